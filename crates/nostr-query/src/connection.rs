//! Boundary contracts consumed by the query engine
//!
//! The engine never talks to a socket. It hands subscription requests to a
//! [`Connection`] and writes accepted events into a [`ResultSink`]; both are
//! implemented by the application.

use nostr_query_core::{
    expand_all, ClientMessage, CompressedFilter, ConnectionId, Filter, SubscriptionId, TaggedEvent,
};
use url::Url;

// ----------------------------------------------------------------------------
// Relay Capabilities
// ----------------------------------------------------------------------------

/// Protocol extensions a request may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nip {
    /// NIP-50 full-text search
    Search,
}

impl Nip {
    pub fn number(&self) -> u16 {
        match self {
            Nip::Search => 50,
        }
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// Continuation run by the connection once a queued request hit the wire
pub type SentCallback = Box<dyn FnOnce() + Send + 'static>;

/// One relay connection as seen by the engine
///
/// `queue_req` and `close_req` must not block and must not call back into the
/// query synchronously from `close_req`; the query may hold its lock while
/// closing subscriptions. `queue_req` is always called without that lock, so
/// the send continuation may run inline.
pub trait Connection: Send + Sync {
    /// Stable identifier of this connection
    fn id(&self) -> &ConnectionId;

    /// Relay address, e.g. `wss://relay.example`
    fn address(&self) -> &str;

    /// Ephemeral connections cannot be targeted by later operations
    fn is_ephemeral(&self) -> bool;

    fn supports_nip(&self, nip: Nip) -> bool;

    /// Enqueue a `REQ`; `on_sent` runs once it was written
    fn queue_req(&self, message: ClientMessage, on_sent: SentCallback);

    /// Enqueue a `CLOSE` for a subscription
    fn close_req(&self, subscription_id: &SubscriptionId);
}

// ----------------------------------------------------------------------------
// Result Sink
// ----------------------------------------------------------------------------

/// Destination of accepted events, shared with the application
pub trait ResultSink: Send + Sync {
    fn add(&self, event: TaggedEvent);

    fn loading(&self) -> bool;

    fn set_loading(&self, loading: bool);
}

// ----------------------------------------------------------------------------
// Built Request
// ----------------------------------------------------------------------------

/// Canonical filters destined for one connection, optionally pinned to a relay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltRequest {
    /// Relay this request is scoped to
    pub relay: Option<String>,
    pub filters: Vec<Filter>,
}

impl BuiltRequest {
    /// Unscoped request, eligible for any addressable connection
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            relay: None,
            filters,
        }
    }

    /// Request that may only be sent to `relay`
    pub fn pinned(relay: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            relay: Some(relay.into()),
            filters,
        }
    }

    /// Build from compressed filters, expanding them to canonical form
    pub fn from_compressed(relay: Option<String>, filters: &[CompressedFilter]) -> Self {
        Self {
            relay,
            filters: expand_all(filters),
        }
    }

    /// Every relay pin on the request or its filters
    pub fn pins(&self) -> impl Iterator<Item = &str> {
        self.relay
            .as_deref()
            .into_iter()
            .chain(self.filters.iter().filter_map(|f| f.relay.as_deref()))
    }

    pub fn is_scoped(&self) -> bool {
        self.pins().next().is_some()
    }

    pub fn requires_search(&self) -> bool {
        self.filters.iter().any(Filter::requires_search)
    }

    /// Filters as tracked by a trace; the request pin is stamped onto each
    pub(crate) fn scoped_filters(&self) -> Vec<Filter> {
        self.filters
            .iter()
            .cloned()
            .map(|mut filter| {
                if filter.relay.is_none() {
                    filter.relay = self.relay.clone();
                }
                filter
            })
            .collect()
    }
}

/// Compare relay addresses after URL normalisation
pub fn same_relay(a: &str, b: &str) -> bool {
    normalize_relay(a) == normalize_relay(b)
}

fn normalize_relay(address: &str) -> String {
    match Url::parse(address.trim()) {
        Ok(url) => url.as_str().trim_end_matches('/').to_string(),
        Err(_) => address.trim().trim_end_matches('/').to_ascii_lowercase(),
    }
}
