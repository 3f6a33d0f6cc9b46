//! Peer session orchestration
//!
//! A session glues one local [`World`] to a broadcast [`Channel`]:
//! inbound messages are authorized and turned into world events, the world
//! is stepped to the wall-clock target, and local input plus state
//! broadcasts go out under a rate limit.
//!
//! The host is the lowest user id in the roster. It announces the
//! authoritative state at start and after every goal (`synchronize`).
//! Every peer periodically publishes a grid snapshot (`desync-check`); when
//! two disagree, the peer with the higher id adopts the other's state.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use glam::Vec2;

use super::channel::Channel;
use super::protocol::{
    BroadcastKind, BroadcastMessage, EVENTS, Inbound, PingMessage, PointerMessage,
};
use crate::sim::{
    EntityId, EntityState, GameEvent, Phase, StartOptions, UserId, World, WorldEvent,
    WorldSnapshot,
};

/// Maps wall-clock time onto the step timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clock {
    origin_ms: u64,
    base_step: u64,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Inbound messages ignored for claiming a paddle or team the sender
    /// does not control
    pub rejected: u32,
    /// Desync checks that disagreed with local state
    pub desyncs: u32,
    /// Remote snapshots adopted
    pub resyncs: u32,
}

pub struct Session<C: Channel> {
    world: World,
    channel: C,
    user: UserId,
    /// User id → team
    roster: BTreeMap<UserId, usize>,
    inbox: Rc<RefCell<VecDeque<Inbound>>>,
    open: Rc<Cell<bool>>,
    clock: Option<Clock>,
    last_send_ms: Option<u64>,
    last_ping_ms: Option<u64>,
    pending_move: Option<PointerMessage>,
    pending_scroll: Option<PointerMessage>,
    next_desync_check: u64,
    stats: SessionStats,
}

impl<C: Channel> Session<C> {
    /// Wrap `world` and subscribe to every session event on `channel`
    pub fn new(world: World, mut channel: C, user: UserId, roster: BTreeMap<UserId, usize>) -> Self {
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let open = Rc::new(Cell::new(true));
        for event in EVENTS {
            let inbox = Rc::clone(&inbox);
            let open = Rc::clone(&open);
            channel.on(
                event,
                Box::new(move |payload| {
                    if !open.get() {
                        return;
                    }
                    match Inbound::decode(event, payload) {
                        Ok(Some(msg)) => inbox.borrow_mut().push_back(msg),
                        Ok(None) => {}
                        Err(e) => log::warn!("Ignoring malformed message: {e}"),
                    }
                }),
            );
        }

        Self {
            world,
            channel,
            user,
            roster,
            inbox,
            open,
            clock: None,
            last_send_ms: None,
            last_ping_ms: None,
            pending_move: None,
            pending_scroll: None,
            next_desync_check: 0,
            stats: SessionStats::default(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn team(&self) -> Option<usize> {
        self.roster.get(&self.user).copied()
    }

    pub fn roster(&self) -> &BTreeMap<UserId, usize> {
        &self.roster
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Whether this peer announces authoritative state
    pub fn is_host(&self) -> bool {
        self.roster.keys().next() == Some(&self.user)
    }

    /// Start the match with step 0 at `now_ms`
    pub fn start(&mut self, now_ms: u64, options: StartOptions) {
        self.world.start(options);
        self.clock = Some(Clock {
            origin_ms: now_ms,
            base_step: 0,
        });
        self.open.set(true);
        self.last_send_ms = None;
        self.last_ping_ms = None;
        self.realign_desync_check();
        log::info!(
            "Session started for user {} (team {:?}, host: {})",
            self.user,
            self.team(),
            self.is_host()
        );
        if self.is_host() {
            let snapshot = self.world.create_snapshot();
            self.broadcast(BroadcastKind::Synchronize, snapshot);
        }
    }

    /// Stop stepping, drop pending output and ignore in-flight messages
    pub fn stop(&mut self) {
        self.world.stop();
        self.open.set(false);
        self.inbox.borrow_mut().clear();
        self.pending_move = None;
        self.pending_scroll = None;
        self.last_send_ms = None;
        self.last_ping_ms = None;
        log::info!("Session stopped for user {}", self.user);
    }

    /// Process inbound messages, step to `now_ms` and flush output
    ///
    /// Returns the world's signals for this frame.
    pub fn update(&mut self, now_ms: u64) -> Vec<GameEvent> {
        if self.world.phase() != Phase::Running {
            self.inbox.borrow_mut().clear();
            return Vec::new();
        }
        let Some(clock) = self.clock else {
            return Vec::new();
        };

        let inbound: Vec<Inbound> = self.inbox.borrow_mut().drain(..).collect();
        for msg in inbound {
            self.handle(msg, now_ms);
        }

        // A synchronize may have moved the clock
        let clock = self.clock.unwrap_or(clock);
        let target = clock.base_step
            + self
                .world
                .settings()
                .steps_for_elapsed(now_ms.saturating_sub(clock.origin_ms));
        self.world.step_to(target);

        let events = self.world.drain_events();
        self.react(&events);
        self.check_desync();
        self.flush(now_ms);
        events
    }

    /// Local pointer moved to `pos` with paddle rotation `rotation`
    pub fn pointer_move(&mut self, pos: Vec2, rotation: f32) {
        let Some(team) = self.team() else {
            return;
        };
        let msg = PointerMessage {
            u: self.user,
            x: pos.x,
            y: pos.y,
            t: team,
            r: rotation,
        };
        self.apply_pointer(&msg, false);
        self.pending_move = Some(msg);
    }

    /// Local wheel turned by `delta` with the pointer at `pos`
    pub fn pointer_scroll(&mut self, pos: Vec2, delta: f32) {
        let Some(team) = self.team() else {
            return;
        };
        let msg = PointerMessage {
            u: self.user,
            x: pos.x,
            y: pos.y,
            t: team,
            r: delta,
        };
        self.apply_pointer(&msg, true);
        let merged = match self.pending_scroll {
            Some(prev) => PointerMessage {
                r: prev.r + delta,
                ..msg
            },
            None => msg,
        };
        self.pending_scroll = Some(merged);
    }

    fn handle(&mut self, msg: Inbound, now_ms: u64) {
        // Only roster members may affect the match
        let Some(from) = msg.sender().filter(|u| self.roster.contains_key(u)) else {
            self.reject("message", msg.sender().unwrap_or_default());
            return;
        };
        match msg {
            Inbound::MouseMove(m) => self.apply_pointer(&m, false),
            Inbound::MouseScroll(m) => self.apply_pointer(&m, true),
            Inbound::Ping(p) => self.apply_ping(p),
            Inbound::Broadcast(b) => match b.name {
                BroadcastKind::Update => self.apply_update(from, b),
                BroadcastKind::Synchronize => self.apply_synchronize(from, b, now_ms),
                BroadcastKind::DesyncCheck => self.apply_desync_check(from, b),
            },
        }
    }

    /// Paddle `user` may steer for `team`: one they own, else a free one
    fn authorize(&self, user: UserId, team: usize) -> Option<usize> {
        if self.roster.get(&user) != Some(&team) {
            return None;
        }
        let indices = &self.world.teams().get(team)?.paddles;
        indices
            .iter()
            .copied()
            .find(|&i| self.world.owner(i) == Some(user))
            .or_else(|| indices.iter().copied().find(|&i| self.world.owner(i).is_none()))
    }

    fn reject(&mut self, what: &str, user: UserId) {
        self.stats.rejected += 1;
        log::trace!("Rejected {what} from user {user}");
    }

    fn apply_pointer(&mut self, m: &PointerMessage, scroll: bool) {
        let Some(index) = self.authorize(m.u, m.t) else {
            self.reject("pointer", m.u);
            return;
        };
        let rotation = if scroll {
            let current = self.world.paddle(index).map_or(0.0, |p| p.rotation);
            current + m.r * self.world.settings().scroll_rotation
        } else {
            m.r
        };
        self.world.create_event(
            WorldEvent::new(EntityId::Paddle(index))
                .with_position(Vec2::new(m.x, m.y))
                .with_rotation(rotation)
                .with_user(m.u),
        );
    }

    fn apply_ping(&mut self, p: PingMessage) {
        let owned = (0..self.world.paddles().len()).find(|&i| self.world.owner(i) == Some(p.u));
        match owned {
            Some(index) => {
                self.world
                    .create_event(WorldEvent::new(EntityId::Paddle(index)).with_user(p.u));
            }
            None => self.reject("ping", p.u),
        }
    }

    /// Partial state from the peer that controls it
    ///
    /// The ball is accepted from any roster member (it comes from whoever
    /// last struck it); paddles only from their owner; scores never.
    fn apply_update(&mut self, from: UserId, b: BroadcastMessage) {
        for entity in &b.snapshot.entities {
            let allowed = match entity {
                EntityState::Ball(_) => true,
                EntityState::Paddle(p) => self.world.owner(p.index) == Some(from),
                EntityState::Team(_) => false,
            };
            if !allowed {
                self.reject("update", from);
                continue;
            }
            self.world
                .insert_event(WorldEvent::from_state(entity, b.snapshot.step));
        }
    }

    fn apply_synchronize(&mut self, from: UserId, b: BroadcastMessage, now_ms: u64) {
        if from >= self.user {
            log::debug!("Ignoring synchronize from user {from}");
            return;
        }
        let step = b.snapshot.step;
        if step > self.world.step() {
            // Behind the sender: move the clock forward to match
            self.clock = Some(Clock {
                origin_ms: now_ms,
                base_step: step,
            });
        }
        self.adopt(b.snapshot);
    }

    fn apply_desync_check(&mut self, from: UserId, b: BroadcastMessage) {
        let tolerance = self.world.settings().desync_tolerance;
        let Some(local) = self.world.buffer().snapshot_at(b.snapshot.step) else {
            log::debug!("No local snapshot for desync check at step {}", b.snapshot.step);
            return;
        };
        if !local.diverges_from(&b.snapshot, tolerance) {
            return;
        }
        self.stats.desyncs += 1;
        log::warn!(
            "User {} diverged from user {from} at step {}",
            self.user,
            b.snapshot.step
        );
        if from < self.user {
            self.adopt(b.snapshot);
        }
    }

    fn adopt(&mut self, snapshot: WorldSnapshot) {
        self.world.resync(snapshot);
        self.stats.resyncs += 1;
        self.realign_desync_check();
    }

    fn react(&mut self, events: &[GameEvent]) {
        let mut goal = false;
        let mut struck = false;
        for event in events {
            match *event {
                GameEvent::Goal { .. } => goal = true,
                GameEvent::PaddleHit { paddle, .. } => {
                    struck |= self.world.owner(paddle) == Some(self.user);
                }
                _ => {}
            }
        }
        if goal && self.is_host() {
            let snapshot = self.world.create_snapshot();
            self.broadcast(BroadcastKind::Synchronize, snapshot);
        } else if struck {
            let snapshot = WorldSnapshot {
                step: self.world.step(),
                entities: vec![EntityState::Ball(self.world.ball().clone())],
            };
            self.broadcast(BroadcastKind::Update, snapshot);
        }
    }

    fn realign_desync_check(&mut self) {
        let interval = self.world.settings().desync_check_interval;
        if interval > 0 {
            self.next_desync_check = (self.world.step() / interval + 1) * interval;
        }
    }

    fn check_desync(&mut self) {
        let interval = self.world.settings().desync_check_interval;
        if interval == 0 {
            return;
        }
        while self.next_desync_check <= self.world.step() {
            let step = self.next_desync_check;
            self.next_desync_check += interval;
            if let Some(snapshot) = self.world.buffer().snapshot_at(step).cloned() {
                self.broadcast(BroadcastKind::DesyncCheck, snapshot);
            }
        }
    }

    /// Send pending input, or a keep-alive, at most once per send interval
    fn flush(&mut self, now_ms: u64) {
        let settings = self.world.settings();
        let (send_interval, ping_interval) = (settings.send_interval_ms, settings.ping_interval_ms);
        if self
            .last_send_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < send_interval)
        {
            return;
        }

        let mut sent = false;
        if let Some(m) = self.pending_move.take() {
            self.send(Inbound::MouseMove(m));
            sent = true;
        }
        if let Some(m) = self.pending_scroll.take() {
            self.send(Inbound::MouseScroll(m));
            sent = true;
        }
        if sent {
            self.last_send_ms = Some(now_ms);
            self.last_ping_ms = Some(now_ms);
            return;
        }

        let holding =
            (0..self.world.paddles().len()).any(|i| self.world.owner(i) == Some(self.user));
        let ping_due = self
            .last_ping_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= ping_interval);
        if holding && ping_due {
            let ping = PingMessage { u: self.user };
            self.apply_ping(ping);
            self.send(Inbound::Ping(ping));
            self.last_send_ms = Some(now_ms);
            self.last_ping_ms = Some(now_ms);
        }
    }

    fn broadcast(&mut self, name: BroadcastKind, snapshot: WorldSnapshot) {
        log::debug!("User {} broadcasting {name:?} at step {}", self.user, snapshot.step);
        self.send(Inbound::Broadcast(BroadcastMessage {
            name,
            snapshot,
            from: Some(self.user),
        }));
    }

    fn send(&mut self, msg: Inbound) {
        let (event, payload) = msg.encode();
        self.channel.send(event, payload);
    }
}
