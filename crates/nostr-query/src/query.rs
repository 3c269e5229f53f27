//! Logical queries
//!
//! A [`Query`] is what the application holds for one logical request. It owns
//! one [`QueryTrace`] per connection it was dispatched to, routes inbound
//! events and EOSE to those traces, keeps the merged filter list of all traces,
//! and runs a periodic sweep that force-closes traces a relay never finished.
//!
//! The handle is cheap to clone. All state sits behind one mutex; every
//! operation takes the lock, mutates, and returns without blocking, so calls
//! from many connections and the sweep task may interleave freely.

use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use hashbrown::HashMap;
use nostr_query_core::{
    event_matches_any, flat_merge, ClientMessage, ConnectionId, Filter, SubscriptionId,
    SystemTimeSource, TaggedEvent, TimeSource, Timestamp,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::config::QueryConfig;
use crate::connection::{same_relay, BuiltRequest, Connection, Nip, ResultSink};
use crate::error::{DispatchError, Result};
use crate::trace::{QueryTrace, TraceSignal, TraceStats};

// ----------------------------------------------------------------------------
// Trace Index
// ----------------------------------------------------------------------------

/// Subscription ids are only unique per connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TraceKey {
    connection: ConnectionId,
    subscription: SubscriptionId,
}

impl TraceKey {
    fn new(connection: &ConnectionId, subscription: &SubscriptionId) -> Self {
        Self {
            connection: connection.clone(),
            subscription: subscription.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Query State
// ----------------------------------------------------------------------------

struct QueryState {
    traces: Vec<QueryTrace>,
    index: HashMap<TraceKey, usize>,
    /// Merged union of every tracked trace's filters
    filters: Vec<Filter>,
    leave_open: bool,
    closing_at: Option<Timestamp>,
    closed: bool,
    sweep: Option<JoinHandle<()>>,
    signal_tx: UnboundedSender<TraceSignal>,
    signals: UnboundedReceiver<TraceSignal>,
}

impl QueryState {
    fn trace_mut(&mut self, key: &TraceKey) -> Option<&mut QueryTrace> {
        let position = *self.index.get(key)?;
        self.traces.get_mut(position)
    }

    fn insert(&mut self, trace: QueryTrace) {
        let key = TraceKey::new(trace.connection_id(), trace.id());
        self.index.insert(key, self.traces.len());
        self.traces.push(trace);
    }

    fn reindex(&mut self) {
        self.index = self
            .traces
            .iter()
            .enumerate()
            .map(|(position, t)| (TraceKey::new(t.connection_id(), t.id()), position))
            .collect();
    }

    fn recompute_filters(&mut self) {
        let all: Vec<Filter> = self
            .traces
            .iter()
            .flat_map(|t| t.filters().iter().cloned())
            .collect();
        self.filters = flat_merge(&all);
    }

    fn progress(&self) -> f64 {
        if self.traces.is_empty() {
            return 0.0;
        }
        let finished = self.traces.iter().filter(|t| t.is_finished()).count();
        finished as f64 / self.traces.len() as f64
    }
}

// ----------------------------------------------------------------------------
// Query
// ----------------------------------------------------------------------------

struct QueryInner {
    id: String,
    config: QueryConfig,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn TimeSource>,
    state: Mutex<QueryState>,
}

/// Active or queued logical query
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

impl Query {
    /// Create a query on the wall clock and start its trace sweep
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(id: impl Into<String>, sink: Arc<dyn ResultSink>, config: QueryConfig) -> Result<Self> {
        Self::with_time_source(id, sink, config, Arc::new(SystemTimeSource::new()))
    }

    /// Create a query with a custom time source
    pub fn with_time_source(
        id: impl Into<String>,
        sink: Arc<dyn ResultSink>,
        config: QueryConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()?;

        let (signal_tx, signals) = mpsc::unbounded_channel();
        let inner = Arc::new(QueryInner {
            id: id.into(),
            sink,
            clock,
            state: Mutex::new(QueryState {
                traces: Vec::new(),
                index: HashMap::new(),
                filters: Vec::new(),
                leave_open: config.leave_open,
                closing_at: None,
                closed: false,
                sweep: None,
                signal_tx,
                signals,
            }),
            config,
        });

        let sweep = spawn_sweep(&runtime, Arc::downgrade(&inner), inner.config.sweep_interval);
        inner.lock().sweep = Some(sweep);
        debug!(query = %inner.id, "query created");

        Ok(Self { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    pub fn sink(&self) -> &Arc<dyn ResultSink> {
        &self.inner.sink
    }

    /// Merged filter list of every tracked trace
    pub fn filters(&self) -> Vec<Filter> {
        self.inner.lock().filters.clone()
    }

    pub fn leave_open(&self) -> bool {
        self.inner.lock().leave_open
    }

    /// Keep subscriptions open after EOSE
    pub fn set_leave_open(&self, leave_open: bool) {
        self.inner.lock().leave_open = leave_open;
    }

    /// Fraction of tracked traces that are finished, zero without traces
    pub fn progress(&self) -> f64 {
        self.inner.lock().progress()
    }

    pub fn trace_count(&self) -> usize {
        self.inner.lock().traces.len()
    }

    /// Statistics snapshot of every tracked trace
    pub fn traces(&self) -> Vec<TraceStats> {
        let now = self.inner.clock.now();
        self.inner.lock().traces.iter().map(|t| t.stats(now)).collect()
    }

    /// Dispatch a request to a connection
    ///
    /// On success the trace is registered and the `REQ` handed to the
    /// connection; the trace is marked sent once the connection reports the
    /// write. A rejected request leaves the query untouched.
    pub fn add_trace(
        &self,
        connection: Arc<dyn Connection>,
        request: &BuiltRequest,
    ) -> core::result::Result<SubscriptionId, DispatchError> {
        check_dispatch(connection.as_ref(), request).inspect_err(|reason| {
            debug!(query = %self.inner.id, relay = connection.address(), %reason, "request not dispatched");
        })?;

        let now = self.inner.clock.now();
        let key = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(DispatchError::QueryClosed {
                    query: self.inner.id.clone(),
                });
            }

            let trace = QueryTrace::new(
                Arc::clone(&connection),
                request.scoped_filters(),
                now,
                state.signal_tx.clone(),
            );
            let key = TraceKey::new(trace.connection_id(), trace.id());
            state.insert(trace);
            self.inner.recompute(&mut state);
            self.inner.settle(&mut state);
            key
        };

        debug!(
            query = %self.inner.id,
            trace = %key.subscription,
            relay = connection.address(),
            filters = request.filters.len(),
            "dispatching request"
        );

        let weak = Arc::downgrade(&self.inner);
        let sent_key = key.clone();
        connection.queue_req(
            ClientMessage::req(key.subscription.clone(), request.filters.clone()),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.mark_sent(&sent_key);
                }
            }),
        );

        Ok(key.subscription)
    }

    /// Forward an event to the sink if one of our traces owns the subscription
    ///
    /// Returns whether the event was accepted. Unknown subscriptions are
    /// ignored; late delivery after close is expected.
    pub fn on_event(&self, subscription_id: &SubscriptionId, event: TaggedEvent) -> bool {
        let accepted = {
            let state = self.inner.lock();
            let mut owners = state
                .traces
                .iter()
                .filter(|t| t.id() == subscription_id)
                .peekable();
            if owners.peek().is_none() {
                return false;
            }
            !self.inner.config.verify_events
                || owners.any(|t| event_matches_any(&event.event, t.filters()))
        };
        self.inner.deliver(subscription_id, event, accepted)
    }

    /// Forward an event received on a specific connection
    ///
    /// Uses the same composite key as EOSE routing, so subscription ids that
    /// collide across connections are checked against the right filters.
    pub fn on_event_from(
        &self,
        subscription_id: &SubscriptionId,
        connection_id: &ConnectionId,
        event: TaggedEvent,
    ) -> bool {
        let key = TraceKey::new(connection_id, subscription_id);
        let accepted = {
            let state = self.inner.lock();
            let Some(trace) = state.index.get(&key).and_then(|&p| state.traces.get(p)) else {
                return false;
            };
            !self.inner.config.verify_events || event_matches_any(&event.event, trace.filters())
        };
        self.inner.deliver(subscription_id, event, accepted)
    }

    /// Handle EOSE for a subscription on a specific connection
    pub fn on_eose(&self, subscription_id: &SubscriptionId, connection_id: &ConnectionId) -> bool {
        let now = self.inner.clock.now();
        let key = TraceKey::new(connection_id, subscription_id);

        let mut state = self.inner.lock();
        let leave_open = state.leave_open;
        let Some(trace) = state.trace_mut(&key) else {
            trace!(query = %self.inner.id, trace = %subscription_id, "EOSE for unknown subscription");
            return false;
        };

        trace.got_eose(now);
        if !leave_open {
            trace.send_close(now);
        }
        self.inner.settle(&mut state);
        true
    }

    /// The relay closed a subscription on its own (`CLOSED`)
    pub fn on_closed(&self, subscription_id: &SubscriptionId, connection_id: &ConnectionId) -> bool {
        let now = self.inner.clock.now();
        let key = TraceKey::new(connection_id, subscription_id);

        let mut state = self.inner.lock();
        let Some(trace) = state.trace_mut(&key) else {
            return false;
        };
        trace.force_eose(now);
        self.inner.settle(&mut state);
        true
    }

    /// Force-close every trace running on a lost connection
    pub fn connection_lost(&self, connection_id: &ConnectionId) -> usize {
        let now = self.inner.clock.now();
        let mut state = self.inner.lock();

        let mut affected = 0;
        for trace in state
            .traces
            .iter_mut()
            .filter(|t| t.connection_id() == connection_id && !t.is_closed())
        {
            trace.force_eose(now);
            affected += 1;
        }

        if affected > 0 {
            debug!(query = %self.inner.id, connection = %connection_id, affected, "connection lost");
        }
        self.inner.settle(&mut state);
        affected
    }

    /// Arm the deferred removal deadline
    ///
    /// Nothing is closed here; in-flight responses may still land until the
    /// owner evicts the query after [`Query::closing_at`].
    pub fn cancel(&self) {
        let deadline = self.inner.clock.now() + self.inner.config.cancel_grace;
        self.inner.lock().closing_at = Some(deadline);
        debug!(query = %self.inner.id, %deadline, "query cancelled");
    }

    pub fn is_closing(&self) -> bool {
        self.inner.lock().closing_at.is_some()
    }

    pub fn closing_at(&self) -> Option<Timestamp> {
        self.inner.lock().closing_at
    }

    /// Whether the query was cancelled and its deadline passed at `now`
    pub fn can_evict(&self, now: Timestamp) -> bool {
        self.closing_at().is_some_and(|deadline| now >= deadline)
    }

    /// [`Query::can_evict`] against the query's own clock
    pub fn is_expired(&self) -> bool {
        self.can_evict(self.inner.clock.now())
    }

    /// Close every trace and stop the sweep; repeated calls are no-ops
    pub fn close(&self) {
        let now = self.inner.clock.now();
        let mut state = self.inner.lock();
        for trace in state.traces.iter_mut() {
            trace.send_close(now);
        }
        state.closed = true;
        if let Some(sweep) = state.sweep.take() {
            sweep.abort();
            debug!(query = %self.inner.id, "query closed");
        }
        self.inner.settle(&mut state);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Whether the periodic sweep task is still running
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .lock()
            .sweep
            .as_ref()
            .is_some_and(|sweep| !sweep.is_finished())
    }

    /// Run one timeout pass, returning the number of traces force-closed
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Discard closed traces and recompute the filter list
    pub fn prune_closed(&self) -> usize {
        let mut state = self.inner.lock();
        let before = state.traces.len();
        state.traces.retain(|t| !t.is_closed());
        let removed = before - state.traces.len();

        if removed > 0 {
            state.reindex();
            self.inner.recompute(&mut state);
            self.inner.update_loading(&state);
        }
        removed
    }
}

impl core::fmt::Debug for Query {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Query").field("id", &self.inner.id).finish()
    }
}

impl QueryInner {
    fn lock(&self) -> MutexGuard<'_, QueryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, subscription_id: &SubscriptionId, event: TaggedEvent, accepted: bool) -> bool {
        if !accepted {
            debug!(
                query = %self.id,
                trace = %subscription_id,
                event = %event.event.id,
                relay = %event.relay,
                "dropping event outside subscription filters"
            );
            return false;
        }
        self.sink.add(event);
        true
    }

    fn mark_sent(&self, key: &TraceKey) {
        let now = self.clock.now();
        let mut state = self.lock();
        if let Some(trace) = state.trace_mut(key) {
            trace.sent_to_relay(now);
        }
        self.settle(&mut state);
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.closed {
            return 0;
        }

        let timeout = self.config.trace_timeout;
        let mut forced = 0;
        for trace in state.traces.iter_mut() {
            if !trace.is_finished() && trace.runtime(now) > timeout {
                debug!(query = %self.id, trace = %trace.id(), relay = trace.relay(), "trace timed out");
                trace.force_eose(now);
                forced += 1;
            }
        }
        self.settle(&mut state);
        forced
    }

    fn recompute(&self, state: &mut QueryState) {
        let started = Instant::now();
        state.recompute_filters();
        trace!(
            query = %self.id,
            traces = state.traces.len(),
            filters = state.filters.len(),
            elapsed = ?started.elapsed(),
            "recomputed filters"
        );
    }

    /// Drain trace signals and react to progress changes
    fn settle(&self, state: &mut QueryState) {
        let mut changed = false;
        while let Ok(signal) = state.signals.try_recv() {
            trace!(query = %self.id, trace = %signal.trace, state = ?signal.state, "trace progress");
            changed = true;
        }
        if changed {
            self.update_loading(state);
        }
    }

    /// Edge-triggered: the sink is only written when the flag flips
    fn update_loading(&self, state: &QueryState) {
        // Nothing in flight; the next dispatch starts a new cycle
        if state.traces.is_empty() {
            return;
        }
        let progress = state.progress();
        let loading = progress < 1.0;
        if self.sink.loading() != loading {
            debug!(query = %self.id, loading, progress, "loading changed");
            self.sink.set_loading(loading);
        }
    }
}

impl Drop for QueryInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(sweep) = state.sweep.take() {
            sweep.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn check_dispatch(connection: &dyn Connection, request: &BuiltRequest) -> core::result::Result<(), DispatchError> {
    if request.filters.is_empty() {
        return Err(DispatchError::EmptyRequest);
    }
    if let Some(pinned) = request.pins().find(|pin| !same_relay(pin, connection.address())) {
        return Err(DispatchError::RelayMismatch {
            pinned: pinned.to_string(),
            relay: connection.address().to_string(),
        });
    }
    if !request.is_scoped() && connection.is_ephemeral() {
        return Err(DispatchError::EphemeralConnection {
            relay: connection.address().to_string(),
        });
    }
    if request.requires_search() && !connection.supports_nip(Nip::Search) {
        return Err(DispatchError::SearchUnsupported {
            relay: connection.address().to_string(),
        });
    }
    Ok(())
}

/// Periodic timeout sweep, alive until the query closes or is dropped
fn spawn_sweep(runtime: &Handle, inner: Weak<QueryInner>, every: Duration) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.lock().closed {
                break;
            }
            inner.sweep();
        }
    })
}
