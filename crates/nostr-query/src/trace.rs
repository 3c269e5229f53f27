//! Per-relay query tracing
//!
//! A [`QueryTrace`] follows one subscription on one connection through
//! `Created → Sent → (Eose | ForceEose) → Closed`. Every transition is
//! published as a [`TraceSignal`] on the progress channel handed in at
//! construction; the trace knows nothing about who listens.

use core::time::Duration;
use std::sync::Arc;

use nostr_query_core::{ConnectionId, Filter, SubscriptionId, Timestamp};
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::connection::Connection;

// ----------------------------------------------------------------------------
// Trace State
// ----------------------------------------------------------------------------

/// Lifecycle state of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceState {
    Created,
    Sent,
    /// Relay signalled end of stored events
    Eose,
    /// Finished by timeout or connection loss instead of a real EOSE
    ForceEose,
    Closed,
}

/// Progress notification emitted on every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSignal {
    pub trace: SubscriptionId,
    pub connection: ConnectionId,
    pub state: TraceState,
}

/// Point-in-time statistics of a trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStats {
    pub id: SubscriptionId,
    pub relay: String,
    pub connection: ConnectionId,
    pub state: TraceState,
    pub queued: Duration,
    pub runtime: Duration,
    pub response_time: Duration,
    pub forced: bool,
}

// ----------------------------------------------------------------------------
// Query Trace
// ----------------------------------------------------------------------------

/// One subscription sent to one connection
pub struct QueryTrace {
    id: SubscriptionId,
    relay: String,
    connection_id: ConnectionId,
    filters: Vec<Filter>,
    start: Timestamp,
    sent: Option<Timestamp>,
    eose: Option<Timestamp>,
    close: Option<Timestamp>,
    forced: bool,
    connection: Arc<dyn Connection>,
    progress: UnboundedSender<TraceSignal>,
}

impl QueryTrace {
    /// Create a trace with a fresh subscription id
    pub fn new(
        connection: Arc<dyn Connection>,
        filters: Vec<Filter>,
        now: Timestamp,
        progress: UnboundedSender<TraceSignal>,
    ) -> Self {
        let trace = Self {
            id: SubscriptionId::generate(),
            relay: connection.address().to_string(),
            connection_id: connection.id().clone(),
            filters,
            start: now,
            sent: None,
            eose: None,
            close: None,
            forced: false,
            connection,
            progress,
        };
        trace.signal();
        trace
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Filters exactly as sent, with relay pins applied
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn sent_at(&self) -> Option<Timestamp> {
        self.sent
    }

    pub fn eose_at(&self) -> Option<Timestamp> {
        self.eose
    }

    pub fn closed_at(&self) -> Option<Timestamp> {
        self.close
    }

    pub fn state(&self) -> TraceState {
        if self.close.is_some() {
            TraceState::Closed
        } else if self.eose.is_some() {
            if self.forced {
                TraceState::ForceEose
            } else {
                TraceState::Eose
            }
        } else if self.sent.is_some() {
            TraceState::Sent
        } else {
            TraceState::Created
        }
    }

    /// EOSE received or forced
    pub fn is_finished(&self) -> bool {
        self.eose.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_some()
    }

    pub fn was_forced(&self) -> bool {
        self.forced
    }

    /// The connection accepted the request for transmission
    pub fn sent_to_relay(&mut self, now: Timestamp) {
        if self.sent.is_some() || self.is_finished() {
            return;
        }
        self.sent = Some(now);
        self.signal();
    }

    /// The relay signalled end of stored events
    pub fn got_eose(&mut self, now: Timestamp) {
        if self.is_finished() {
            return;
        }
        self.eose = Some(now);
        self.signal();
    }

    /// Finish without a real EOSE and close the subscription
    pub fn force_eose(&mut self, now: Timestamp) {
        if self.is_closed() {
            return;
        }
        if !self.is_finished() {
            self.eose = Some(now);
            self.forced = true;
            self.signal();
        }
        self.send_close(now);
    }

    /// Close the subscription on the relay; repeated calls are no-ops
    pub fn send_close(&mut self, now: Timestamp) {
        if self.is_closed() {
            return;
        }
        // close always follows eose
        if !self.is_finished() {
            self.eose = Some(now);
            self.forced = true;
        }
        self.close = Some(now);
        trace!(trace = %self.id, relay = %self.relay, "closing subscription");
        self.connection.close_req(&self.id);
        self.signal();
    }

    /// Time spent waiting to be written to the relay
    pub fn queued(&self, now: Timestamp) -> Duration {
        let until = match (self.sent, self.eose) {
            (Some(sent), _) => sent,
            (None, Some(eose)) if self.forced => eose,
            _ => now,
        };
        until.duration_since(self.start)
    }

    /// Time from creation until EOSE, or until now while unfinished
    pub fn runtime(&self, now: Timestamp) -> Duration {
        self.eose.unwrap_or(now).duration_since(self.start)
    }

    /// Time the relay took to answer, zero while unfinished
    pub fn response_time(&self) -> Duration {
        match (self.sent, self.eose) {
            (Some(sent), Some(eose)) => eose.duration_since(sent),
            _ => Duration::ZERO,
        }
    }

    pub fn stats(&self, now: Timestamp) -> TraceStats {
        TraceStats {
            id: self.id.clone(),
            relay: self.relay.clone(),
            connection: self.connection_id.clone(),
            state: self.state(),
            queued: self.queued(now),
            runtime: self.runtime(now),
            response_time: self.response_time(),
            forced: self.forced,
        }
    }

    fn signal(&self) {
        // The owning query may already be gone
        let _ = self.progress.send(TraceSignal {
            trace: self.id.clone(),
            connection: self.connection_id.clone(),
            state: self.state(),
        });
    }
}

impl core::fmt::Debug for QueryTrace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueryTrace")
            .field("id", &self.id)
            .field("relay", &self.relay)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state())
            .field("filters", &self.filters.len())
            .finish()
    }
}
