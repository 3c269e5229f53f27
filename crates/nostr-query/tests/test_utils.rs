//! Test utilities for deterministic query engine tests
//!
//! Mock connections record every request instead of writing to a socket, the
//! mock sink collects events, and time only moves when a test says so.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nostr_query::{
    ClientMessage, Connection, ConnectionId, Event, Nip, ResultSink, SentCallback, SubscriptionId,
    TaggedEvent, TimeSource, Timestamp,
};

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new() -> Self {
        Self::new_at(0)
    }

    /// Create a mock time source starting at a specific time
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Mock Connection
// ----------------------------------------------------------------------------

/// Connection that records traffic; send completions run on `flush`
pub struct MockConnection {
    id: ConnectionId,
    address: String,
    ephemeral: bool,
    search: bool,
    auto_flush: bool,
    queued: Mutex<Vec<ClientMessage>>,
    pending: Mutex<Vec<SentCallback>>,
    closed: Mutex<Vec<SubscriptionId>>,
}

impl MockConnection {
    pub fn new(id: &str, address: &str) -> Self {
        Self {
            id: ConnectionId::new(id),
            address: address.to_string(),
            ephemeral: false,
            search: false,
            auto_flush: false,
            queued: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn with_search(mut self) -> Self {
        self.search = true;
        self
    }

    /// Run send completions as soon as a request is queued
    pub fn auto_flush(mut self) -> Self {
        self.auto_flush = true;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Report every queued request as written
    pub fn flush(&self) -> usize {
        let pending: Vec<SentCallback> = self.pending.lock().unwrap().drain(..).collect();
        let count = pending.len();
        for on_sent in pending {
            on_sent();
        }
        count
    }

    pub fn queued(&self) -> Vec<ClientMessage> {
        self.queued.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<SubscriptionId> {
        self.closed.lock().unwrap().clone()
    }
}

impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    fn supports_nip(&self, nip: Nip) -> bool {
        match nip {
            Nip::Search => self.search,
        }
    }

    fn queue_req(&self, message: ClientMessage, on_sent: SentCallback) {
        self.queued.lock().unwrap().push(message);
        if self.auto_flush {
            on_sent();
        } else {
            self.pending.lock().unwrap().push(on_sent);
        }
    }

    fn close_req(&self, subscription_id: &SubscriptionId) {
        self.closed.lock().unwrap().push(subscription_id.clone());
    }
}

// ----------------------------------------------------------------------------
// Mock Sink
// ----------------------------------------------------------------------------

/// Result sink that records events and counts loading flips
#[derive(Default)]
pub struct MockSink {
    events: Mutex<Vec<TaggedEvent>>,
    loading: AtomicBool,
    loading_writes: AtomicUsize,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TaggedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of times `set_loading` was called
    pub fn loading_writes(&self) -> usize {
        self.loading_writes.load(Ordering::SeqCst)
    }
}

impl ResultSink for MockSink {
    fn add(&self, event: TaggedEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn set_loading(&self, loading: bool) {
        self.loading_writes.fetch_add(1, Ordering::SeqCst);
        self.loading.store(loading, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub fn text_note(id: &str, author: &str, created_at: u64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: author.to_string(),
        created_at,
        kind: 1,
        tags: Vec::new(),
        content: "hello".to_string(),
        sig: String::new(),
    }
}
