// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared text utilities: option word lists and dummy prompt construction.

pub mod dummy;
pub mod words;
