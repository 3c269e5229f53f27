//! NIP-01 wire messages
//!
//! Frames are JSON arrays whose first element names the message type. Only the
//! messages that touch subscriptions are modelled here.

use serde_json::{json, Value};

use crate::errors::{CoreError, Result};
use crate::event::Event;
use crate::filter::Filter;
use crate::types::SubscriptionId;

// ----------------------------------------------------------------------------
// Client to Relay
// ----------------------------------------------------------------------------

/// Messages sent from the engine to a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `["REQ", <id>, <filter>...]`
    Req {
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <id>]`
    Close(SubscriptionId),
}

impl ClientMessage {
    pub fn req(subscription_id: SubscriptionId, filters: Vec<Filter>) -> Self {
        ClientMessage::Req {
            subscription_id,
            filters,
        }
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        match self {
            ClientMessage::Req {
                subscription_id, ..
            } => subscription_id,
            ClientMessage::Close(subscription_id) => subscription_id,
        }
    }

    /// Encode as a JSON frame
    pub fn as_json(&self) -> Result<String> {
        let frame = match self {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![json!("REQ"), json!(subscription_id)];
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            ClientMessage::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        };
        Ok(frame.to_string())
    }

    /// Decode a JSON frame
    pub fn from_json(input: &str) -> Result<Self> {
        let (label, mut fields) = split_frame(input)?;
        match label.as_str() {
            "REQ" => {
                let subscription_id = take_subscription_id(&mut fields)?;
                let filters = fields
                    .map(serde_json::from_value)
                    .collect::<core::result::Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::req(subscription_id, filters))
            }
            "CLOSE" => Ok(ClientMessage::Close(take_subscription_id(&mut fields)?)),
            _ => Err(CoreError::UnknownMessage { label }),
        }
    }
}

// ----------------------------------------------------------------------------
// Relay to Client
// ----------------------------------------------------------------------------

/// Messages received from a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// `["EVENT", <id>, <event>]`
    Event {
        subscription_id: SubscriptionId,
        event: Box<Event>,
    },
    /// `["EOSE", <id>]`
    Eose(SubscriptionId),
    /// `["CLOSED", <id>, <message>]`
    Closed {
        subscription_id: SubscriptionId,
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice(String),
    /// `["OK", <event id>, <accepted>, <message>]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
}

impl RelayMessage {
    pub fn event(subscription_id: SubscriptionId, event: Event) -> Self {
        RelayMessage::Event {
            subscription_id,
            event: Box::new(event),
        }
    }

    /// Encode as a JSON frame
    pub fn as_json(&self) -> Result<String> {
        let frame = match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, serde_json::to_value(event)?]),
            RelayMessage::Eose(subscription_id) => json!(["EOSE", subscription_id]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            RelayMessage::Notice(message) => json!(["NOTICE", message]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
        };
        Ok(frame.to_string())
    }

    /// Decode a JSON frame
    pub fn from_json(input: &str) -> Result<Self> {
        let (label, mut fields) = split_frame(input)?;
        match label.as_str() {
            "EVENT" => {
                let subscription_id = take_subscription_id(&mut fields)?;
                let event = fields
                    .next()
                    .ok_or_else(|| CoreError::malformed("EVENT without event"))?;
                Ok(RelayMessage::event(
                    subscription_id,
                    serde_json::from_value(event)?,
                ))
            }
            "EOSE" => Ok(RelayMessage::Eose(take_subscription_id(&mut fields)?)),
            "CLOSED" => {
                let subscription_id = take_subscription_id(&mut fields)?;
                let message = take_string(&mut fields).unwrap_or_default();
                Ok(RelayMessage::Closed {
                    subscription_id,
                    message,
                })
            }
            "NOTICE" => Ok(RelayMessage::Notice(
                take_string(&mut fields).unwrap_or_default(),
            )),
            "OK" => {
                let event_id = take_string(&mut fields)
                    .ok_or_else(|| CoreError::malformed("OK without event id"))?;
                let accepted = fields
                    .next()
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| CoreError::malformed("OK without status"))?;
                let message = take_string(&mut fields).unwrap_or_default();
                Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            _ => Err(CoreError::UnknownMessage { label }),
        }
    }
}

// ----------------------------------------------------------------------------
// Frame Helpers
// ----------------------------------------------------------------------------

fn split_frame(input: &str) -> Result<(String, std::vec::IntoIter<Value>)> {
    let Value::Array(frame) = serde_json::from_str::<Value>(input)? else {
        return Err(CoreError::malformed("frame is not an array"));
    };
    let mut fields = frame.into_iter();
    let label = match fields.next() {
        Some(Value::String(label)) => label,
        _ => return Err(CoreError::malformed("missing message type")),
    };
    Ok((label, fields))
}

fn take_string(fields: &mut std::vec::IntoIter<Value>) -> Option<String> {
    match fields.next() {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

fn take_subscription_id(fields: &mut std::vec::IntoIter<Value>) -> Result<SubscriptionId> {
    take_string(fields)
        .map(SubscriptionId::new)
        .ok_or_else(|| CoreError::malformed("missing subscription id"))
}
