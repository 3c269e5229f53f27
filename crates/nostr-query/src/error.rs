//! Error types for the query engine
//!
//! Nothing here is fatal to a running query. A [`DispatchError`] only means a
//! request was not sent to one connection; the caller picks another relay or
//! moves on.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Reasons a request was not dispatched to a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Request pinned to {pinned} cannot be sent to {relay}")]
    RelayMismatch { pinned: String, relay: String },

    #[error("Unscoped request cannot be sent to ephemeral connection {relay}")]
    EphemeralConnection { relay: String },

    #[error("Relay {relay} does not support search")]
    SearchUnsupported { relay: String },

    #[error("Request contains no filters")]
    EmptyRequest,

    #[error("Query {query} is closed")]
    QueryClosed { query: String },
}

/// Errors raised while creating a query
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Invalid query configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("No tokio runtime available to drive the trace sweep")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

pub type Result<T> = core::result::Result<T, QueryError>;
