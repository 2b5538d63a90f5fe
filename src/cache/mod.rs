// SPDX-License-Identifier: MIT OR Apache-2.0

//! Volatile per-encoder state shared between the capture and blend hooks.
//!
//! - [`SessionStore`] — last captured [`SessionState`] per encoder tag.

mod session;

pub use session::{SessionState, SessionStore};
