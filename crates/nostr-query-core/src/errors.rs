//! Error types for the query core
//!
//! Only decoding can fail in this crate. Filter expansion, merging and matching
//! are total functions and never return errors.

use thiserror::Error;

/// Errors raised while decoding wire frames or filter references
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed message frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("Unknown message type: {label}")]
    UnknownMessage { label: String },

    #[error("Invalid coordinate: {input}")]
    InvalidCoordinate { input: String },

    #[error("Invalid tag name: {input}")]
    InvalidTagName { input: String },
}

impl CoreError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CoreError::MalformedFrame {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = core::result::Result<T, CoreError>;
