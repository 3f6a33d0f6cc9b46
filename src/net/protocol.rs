//! Wire payloads exchanged between peers
//!
//! Every message is a named event carrying a JSON object:
//!
//! | event         | payload                          |
//! |---------------|----------------------------------|
//! | `mousemove`   | `{u, x, y, t, r}` absolute pose  |
//! | `mousescroll` | `{u, x, y, t, r}` wheel delta    |
//! | `ping`        | `{u}` ownership keep-alive       |
//! | `broadcast`   | `{name, snapshot, from}`         |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sim::{UserId, WorldSnapshot};

pub const MOUSEMOVE: &str = "mousemove";
pub const MOUSESCROLL: &str = "mousescroll";
pub const PING: &str = "ping";
pub const BROADCAST: &str = "broadcast";

/// Every event name a session listens for
pub const EVENTS: [&str; 4] = [MOUSEMOVE, MOUSESCROLL, PING, BROADCAST];

/// Pointer input from a user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerMessage {
    /// Sending user
    pub u: UserId,
    pub x: f32,
    pub y: f32,
    /// Team the user plays for
    pub t: usize,
    /// Rotation (move) or wheel delta (scroll)
    pub r: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    pub u: UserId,
}

/// Purpose of a state broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BroadcastKind {
    /// Partial state the sender is authoritative for
    Update,
    /// Full state everyone should adopt
    Synchronize,
    /// Full state for comparison only
    DesyncCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub name: BroadcastKind,
    pub snapshot: WorldSnapshot,
    #[serde(default)]
    pub from: Option<UserId>,
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    MouseMove(PointerMessage),
    MouseScroll(PointerMessage),
    Ping(PingMessage),
    Broadcast(BroadcastMessage),
}

fn parse<T: serde::de::DeserializeOwned>(event: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|source| Error::Payload {
        event: event.to_string(),
        source,
    })
}

impl Inbound {
    /// Decode a named payload; unknown event names yield `Ok(None)`
    pub fn decode(event: &str, payload: Value) -> Result<Option<Self>> {
        let msg = match event {
            MOUSEMOVE => Inbound::MouseMove(parse(event, payload)?),
            MOUSESCROLL => Inbound::MouseScroll(parse(event, payload)?),
            PING => Inbound::Ping(parse(event, payload)?),
            BROADCAST => Inbound::Broadcast(parse(event, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }

    /// Event name and JSON payload for sending
    pub fn encode(&self) -> (&'static str, Value) {
        // Plain structs of numbers and strings always serialize
        let value = |r: serde_json::Result<Value>| r.unwrap_or(Value::Null);
        match self {
            Inbound::MouseMove(m) => (MOUSEMOVE, value(serde_json::to_value(m))),
            Inbound::MouseScroll(m) => (MOUSESCROLL, value(serde_json::to_value(m))),
            Inbound::Ping(m) => (PING, value(serde_json::to_value(m))),
            Inbound::Broadcast(m) => (BROADCAST, value(serde_json::to_value(m))),
        }
    }

    /// User the message claims to come from
    pub fn sender(&self) -> Option<UserId> {
        match self {
            Inbound::MouseMove(m) | Inbound::MouseScroll(m) => Some(m.u),
            Inbound::Ping(m) => Some(m.u),
            Inbound::Broadcast(m) => m.from,
        }
    }
}
