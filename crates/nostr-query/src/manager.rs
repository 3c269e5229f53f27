//! Registry of live queries and relay message routing
//!
//! The manager is owned by the relay-side driver. Every frame read from a
//! connection goes through [`QueryManager::handle_message`], which offers it
//! to the registered queries; subscriptions nobody claims are dropped.

use hashbrown::HashMap;
use nostr_query_core::{ConnectionId, RelayMessage, TaggedEvent, Timestamp};
use tracing::{debug, info, trace, warn};

use crate::connection::Connection;
use crate::query::Query;

// ----------------------------------------------------------------------------
// Query Manager
// ----------------------------------------------------------------------------

/// Routes relay traffic to the queries that own it
#[derive(Debug, Default)]
pub struct QueryManager {
    queries: HashMap<String, Query>,
}

impl QueryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query, returning any query it replaced under the same id
    pub fn insert(&mut self, query: Query) -> Option<Query> {
        self.queries.insert(query.id().to_string(), query)
    }

    pub fn get(&self, id: &str) -> Option<&Query> {
        self.queries.get(id)
    }

    /// Close and unregister a query
    pub fn remove(&mut self, id: &str) -> Option<Query> {
        let query = self.queries.remove(id)?;
        query.close();
        Some(query)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    /// Dispatch one relay frame received on `connection`
    ///
    /// Returns whether a query claimed it.
    pub fn handle_message(&self, connection: &dyn Connection, message: RelayMessage) -> bool {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let tagged = TaggedEvent::new(*event, connection.address());
                let claimed = self.queries.values().any(|query| {
                    query.on_event_from(&subscription_id, connection.id(), tagged.clone())
                });
                if !claimed {
                    trace!(relay = connection.address(), subscription = %subscription_id, "unclaimed event");
                }
                claimed
            }
            RelayMessage::Eose(subscription_id) => self
                .queries
                .values()
                .any(|query| query.on_eose(&subscription_id, connection.id())),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                warn!(
                    relay = connection.address(),
                    subscription = %subscription_id,
                    %message,
                    "relay closed subscription"
                );
                self.queries
                    .values()
                    .any(|query| query.on_closed(&subscription_id, connection.id()))
            }
            RelayMessage::Notice(message) => {
                info!(relay = connection.address(), %message, "relay notice");
                false
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                debug!(relay = connection.address(), %event_id, accepted, %message, "publish result");
                false
            }
        }
    }

    /// Force-close every trace on a lost connection across all queries
    pub fn connection_lost(&self, connection_id: &ConnectionId) -> usize {
        self.queries
            .values()
            .map(|query| query.connection_lost(connection_id))
            .sum()
    }

    /// Close and drop cancelled queries whose grace period ended by `now`
    pub fn evict_expired(&mut self, now: Timestamp) -> Vec<String> {
        let expired: Vec<String> = self
            .queries
            .iter()
            .filter(|(_, query)| query.can_evict(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(query) = self.queries.remove(id) {
                query.close();
                debug!(query = %id, "evicted cancelled query");
            }
        }
        expired
    }

    /// Close every registered query and clear the registry
    pub fn close_all(&mut self) {
        for (_, query) in self.queries.drain() {
            query.close();
        }
    }
}
