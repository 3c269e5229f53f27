//! Nostr Query Engine
//!
//! This crate drives logical queries against a pool of relay connections:
//! - `QueryTrace`: one subscription on one connection, from `REQ` to `CLOSE`
//! - `Query`: the application-facing aggregate over its traces, with progress,
//!   a merged filter list and a timeout sweep
//! - `QueryManager`: routes relay frames to the queries that own them
//!
//! Filter algebra and the wire codec live in `nostr-query-core` and are
//! re-exported here.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod query;
pub mod trace;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{QueryConfig, DEFAULT_CANCEL_GRACE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TRACE_TIMEOUT};
pub use connection::{same_relay, BuiltRequest, Connection, Nip, ResultSink, SentCallback};
pub use error::{DispatchError, QueryError, Result};
pub use manager::QueryManager;
pub use query::Query;
pub use trace::{QueryTrace, TraceSignal, TraceState, TraceStats};

// Re-export core types for convenience
pub use nostr_query_core::{
    event_matches_any, event_matches_filter, expand, expand_all, flat_merge, ClientMessage,
    CompressedFilter, ConnectionId, Coordinate, CoreError, Event, Filter, Reference,
    RelayMessage, SingleLetterTag, SubscriptionId, SystemTimeSource, TaggedEvent, TimeSource,
    Timestamp,
};
