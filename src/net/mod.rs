//! Peer synchronization over a broadcast channel
//!
//! - `channel`: transport trait plus an in-process loopback hub
//! - `protocol`: named JSON payloads
//! - `session`: per-peer orchestration (authorization, stepping, resync)

pub mod channel;
pub mod protocol;
pub mod session;

pub use channel::{Channel, Handler, HubStats, LinkConfig, LoopbackChannel, LoopbackHub};
pub use protocol::{BroadcastKind, BroadcastMessage, Inbound, PingMessage, PointerMessage};
pub use session::{Session, SessionStats};
