//! Broadcast channel abstraction and an in-process loopback
//!
//! A channel delivers named JSON payloads to every other participant,
//! best effort and at most once. Handlers run once per received message
//! in arrival order.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde_json::Value;

/// Callback for one named event
pub type Handler = Box<dyn FnMut(Value)>;

/// Named-event broadcast transport
pub trait Channel {
    /// Broadcast `payload` under `event` to every other participant
    fn send(&mut self, event: &str, payload: Value);
    /// Register a handler for incoming `event` messages
    fn on(&mut self, event: &str, handler: Handler);
}

/// Delay and loss applied to every loopback delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Probability (0..1) that a single delivery is lost
    pub drop_rate: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            drop_rate: 0.0,
        }
    }
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct Pending {
    due_ms: u64,
    seq: u64,
    to: usize,
    event: String,
    payload: Value,
}

struct HubInner {
    now_ms: u64,
    seq: u64,
    link: LinkConfig,
    rng: Pcg32,
    handlers: Vec<HashMap<String, Vec<Handler>>>,
    queue: Vec<Pending>,
    stats: HubStats,
}

/// In-process broadcast hub connecting any number of peers
///
/// Messages are queued with a seeded random delay and delivered when the
/// hub is pumped, so runs are reproducible for a given seed.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LoopbackHub {
    pub fn new(link: LinkConfig, seed: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HubInner {
                now_ms: 0,
                seq: 0,
                link,
                rng: Pcg32::seed_from_u64(seed),
                handlers: Vec::new(),
                queue: Vec::new(),
                stats: HubStats::default(),
            })),
        }
    }

    /// Attach a new peer
    pub fn connect(&self) -> LoopbackChannel {
        let mut inner = self.inner.borrow_mut();
        inner.handlers.push(HashMap::new());
        LoopbackChannel {
            inner: Rc::clone(&self.inner),
            peer: inner.handlers.len() - 1,
        }
    }

    /// Deliver everything due by `now_ms`; returns the number delivered
    pub fn pump(&self, now_ms: u64) -> usize {
        let due = {
            let mut inner = self.inner.borrow_mut();
            inner.now_ms = now_ms;
            let (mut due, rest): (Vec<_>, Vec<_>) =
                inner.queue.drain(..).partition(|p| p.due_ms <= now_ms);
            inner.queue = rest;
            due.sort_by_key(|p| (p.due_ms, p.seq));
            due
        };

        let count = due.len();
        for msg in due {
            // Handlers are taken out while they run so they may send or
            // register without re-borrowing the hub
            let taken = self
                .inner
                .borrow_mut()
                .handlers
                .get_mut(msg.to)
                .and_then(|h| h.remove(&msg.event));
            let Some(mut handlers) = taken else {
                log::trace!("No handler for {} on peer {}", msg.event, msg.to);
                continue;
            };
            for handler in &mut handlers {
                handler(msg.payload.clone());
            }
            let mut inner = self.inner.borrow_mut();
            inner.stats.delivered += 1;
            if let Some(slot) = inner.handlers.get_mut(msg.to) {
                let added = slot.remove(&msg.event).unwrap_or_default();
                handlers.extend(added);
                slot.insert(msg.event, handlers);
            }
        }
        count
    }

    /// Messages still in flight
    pub fn in_flight(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn stats(&self) -> HubStats {
        self.inner.borrow().stats
    }
}

/// One peer's endpoint on a [`LoopbackHub`]
pub struct LoopbackChannel {
    inner: Rc<RefCell<HubInner>>,
    peer: usize,
}

impl LoopbackChannel {
    pub fn peer(&self) -> usize {
        self.peer
    }
}

impl Channel for LoopbackChannel {
    fn send(&mut self, event: &str, payload: Value) {
        let mut inner = self.inner.borrow_mut();
        inner.stats.sent += 1;
        let peers = inner.handlers.len();
        for to in (0..peers).filter(|&to| to != self.peer) {
            let link = inner.link;
            if link.drop_rate > 0.0 && inner.rng.random::<f64>() < link.drop_rate {
                inner.stats.dropped += 1;
                continue;
            }
            let delay = if link.max_delay_ms > link.min_delay_ms {
                inner.rng.random_range(link.min_delay_ms..=link.max_delay_ms)
            } else {
                link.min_delay_ms
            };
            let seq = inner.seq;
            inner.seq += 1;
            let due_ms = inner.now_ms + delay;
            inner.queue.push(Pending {
                due_ms,
                seq,
                to,
                event: event.to_string(),
                payload: payload.clone(),
            });
        }
    }

    fn on(&mut self, event: &str, handler: Handler) {
        if let Some(slot) = self.inner.borrow_mut().handlers.get_mut(self.peer) {
            slot.entry(event.to_string()).or_default().push(handler);
        }
    }
}
