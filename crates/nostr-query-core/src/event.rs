//! NIP-01 event representation
//!
//! Events are carried as received. Ids and signatures are opaque hex strings;
//! verifying them belongs to the layer that owns keys.

use serde::{Deserialize, Serialize};

use crate::types::{Kind, UnixSeconds};

/// Signed event as published by a relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: UnixSeconds,
    pub kind: Kind,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// Values of every tag whose name is the single letter `name`
    pub fn tag_values(&self, name: char) -> impl Iterator<Item = &str> + '_ {
        self.tags.iter().filter_map(move |tag| {
            let mut fields = tag.iter();
            let tag_name = fields.next()?;
            let mut chars = tag_name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c == name => fields.next().map(String::as_str),
                _ => None,
            }
        })
    }

    /// The `d` identifier of an addressable event
    pub fn identifier(&self) -> Option<&str> {
        self.tag_values('d').next()
    }
}

/// Event annotated with the relay it was received from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedEvent {
    pub event: Event,
    /// Address of the relay that delivered the event
    pub relay: String,
}

impl TaggedEvent {
    pub fn new(event: Event, relay: impl Into<String>) -> Self {
        Self {
            event,
            relay: relay.into(),
        }
    }
}
