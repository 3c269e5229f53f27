//! Nostr Query Core
//!
//! This crate provides the pure, synchronous half of the relay query engine: the
//! NIP-01 event and filter model, compressed filter expansion, filter set merging,
//! local event matching, and the wire message codec. Nothing in here performs I/O
//! or owns a timer; the `nostr-query` crate drives these pieces against live relays.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod errors;
pub mod event;
pub mod expander;
pub mod filter;
pub mod matcher;
pub mod merger;
pub mod message;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use errors::{CoreError, Result};
pub use event::{Event, TaggedEvent};
pub use expander::{expand, expand_all, CompressedFilter, Coordinate, Reference};
pub use filter::{Filter, SingleLetterTag};
pub use matcher::{event_matches_any, event_matches_filter};
pub use merger::{filter_includes, flat_merge, merge_similar, simple_merge};
pub use message::{ClientMessage, RelayMessage};
pub use types::{
    ConnectionId, Kind, SubscriptionId, SystemTimeSource, TimeSource, Timestamp, UnixSeconds,
};
