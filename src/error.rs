// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for candle-cutoff.

/// Errors that can occur while classifying rows or blending conditioning.
#[derive(Debug, thiserror::Error)]
pub enum CutoffError {
    /// Tensor operation error (wraps candle).
    #[error("tensor error: {0}")]
    Model(#[from] candle_core::Error),

    /// Tokenizer error.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Host text encoder error.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// Conditioning tensor or row set has an unexpected shape.
    #[error("shape error: {0}")]
    Shape(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// JSON error while reading configuration.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for candle-cutoff operations.
pub type Result<T> = std::result::Result<T, CutoffError>;
