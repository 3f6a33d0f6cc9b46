//! Step-stamped events and snapshots
//!
//! Every state change that did not come out of the simulation itself (a
//! remote paddle move, an ownership refresh, a ball correction) enters the
//! world as a [`WorldEvent`] stamped with the step it applies to. Events
//! sit in two lists: `active` holds what is still due, `history` keeps
//! everything within the replay window so a rewind can play it again.

use std::collections::VecDeque;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::state::{EntityId, EntityState, UserId};

/// A targeted partial state change applied at `step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub target: EntityId,
    pub step: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_velocity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    /// User claiming or refreshing ownership of a paddle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
}

impl WorldEvent {
    /// Empty event for `target`; the step is stamped on submission
    pub fn new(target: EntityId) -> Self {
        Self {
            target,
            step: 0,
            position: None,
            rotation: None,
            velocity: None,
            angular_velocity: None,
            score: None,
            user: None,
        }
    }

    pub fn at(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_angular_velocity(mut self, angular_velocity: f32) -> Self {
        self.angular_velocity = Some(angular_velocity);
        self
    }

    pub fn with_score(mut self, score: i32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    /// Event that overwrites an entity with a captured state
    ///
    /// Ownership is left alone; only motion and score carry over.
    pub fn from_state(state: &EntityState, step: u64) -> Self {
        let event = Self::new(state.id()).at(step);
        match state {
            EntityState::Ball(ball) => event.with_position(ball.pos).with_velocity(ball.vel),
            EntityState::Paddle(paddle) => event
                .with_position(paddle.pos)
                .with_rotation(paddle.rotation)
                .with_velocity(paddle.vel)
                .with_angular_velocity(paddle.angular_vel),
            EntityState::Team(team) => event.with_score(team.score),
        }
    }
}

/// Full serialized world state at the start of `step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub step: u64,
    pub entities: Vec<EntityState>,
}

impl WorldSnapshot {
    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.entities.iter().find(|e| e.id() == id)
    }

    /// Whether two snapshots of the same step disagree beyond `tolerance`
    ///
    /// Positions, velocities and rotations compare within `tolerance`;
    /// scores must match exactly. Ownership is not compared since claims
    /// legitimately land a few steps apart on different peers.
    pub fn diverges_from(&self, other: &WorldSnapshot, tolerance: f32) -> bool {
        if self.entities.len() != other.entities.len() {
            return true;
        }
        let close = |a: Vec2, b: Vec2| a.distance(b) <= tolerance;
        self.entities.iter().any(|mine| {
            let Some(theirs) = other.entity(mine.id()) else {
                return true;
            };
            match (mine, theirs) {
                (EntityState::Ball(a), EntityState::Ball(b)) => {
                    !(close(a.pos, b.pos) && close(a.vel, b.vel))
                }
                (EntityState::Paddle(a), EntityState::Paddle(b)) => {
                    !(close(a.pos, b.pos) && (a.rotation - b.rotation).abs() <= tolerance)
                }
                (EntityState::Team(a), EntityState::Team(b)) => a.score != b.score,
                _ => true,
            }
        })
    }
}

/// What happened to an event handed to [`EventBuffer::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// Due now or later; will be played when its step runs
    Queued,
    /// Belongs to a past step still inside the window; the world must
    /// rewind to this step to apply it
    Rewind(u64),
    /// Older than the replay window; discarded
    Stale,
}

/// Active/history event lists plus the snapshot ring
#[derive(Debug, Clone)]
pub struct EventBuffer {
    active: Vec<WorldEvent>,
    history: Vec<WorldEvent>,
    snapshots: VecDeque<WorldSnapshot>,
    event_lifetime: u64,
    snapshot_lifetime: u64,
}

impl EventBuffer {
    pub fn new(event_lifetime: u64, snapshot_lifetime: u64) -> Self {
        Self {
            active: Vec::new(),
            history: Vec::new(),
            snapshots: VecDeque::new(),
            event_lifetime,
            snapshot_lifetime,
        }
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.history.clear();
        self.snapshots.clear();
    }

    pub fn active(&self) -> &[WorldEvent] {
        &self.active
    }

    pub fn history(&self) -> &[WorldEvent] {
        &self.history
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &WorldSnapshot> {
        self.snapshots.iter()
    }

    /// Stamp `event` with the current step and queue it
    pub fn create_event(&mut self, mut event: WorldEvent, step: u64) -> WorldEvent {
        event.step = step;
        self.active.push(event.clone());
        self.push_history(event.clone());
        event
    }

    /// Accept an event carrying its own step
    pub fn insert(&mut self, event: WorldEvent, current: u64) -> Insertion {
        if event.step >= current {
            self.active.push(event.clone());
            self.push_history(event);
            return Insertion::Queued;
        }
        if current - event.step > self.event_lifetime {
            log::warn!(
                "Discarding {} event for step {} ({} steps old)",
                event.target,
                event.step,
                current - event.step
            );
            return Insertion::Stale;
        }
        let step = event.step;
        self.push_history(event);
        Insertion::Rewind(step)
    }

    /// History stays ordered by step; same-step events keep arrival order
    fn push_history(&mut self, event: WorldEvent) {
        let at = self.history.partition_point(|e| e.step <= event.step);
        self.history.insert(at, event);
    }

    /// Remove and return the active events due at `step`
    ///
    /// Events left behind for an earlier step (the counter jumped past
    /// them) are dropped with a warning.
    pub fn take_due(&mut self, step: u64) -> Vec<WorldEvent> {
        let mut due = Vec::new();
        self.active.retain(|e| {
            if e.step == step {
                due.push(e.clone());
                false
            } else if e.step < step {
                log::warn!("Dropping stale {} event for step {} at {step}", e.target, e.step);
                false
            } else {
                true
            }
        });
        due
    }

    /// Recorded events for `step`, for replaying after a rewind
    pub fn replay_events(&self, step: u64) -> Vec<WorldEvent> {
        let start = self.history.partition_point(|e| e.step < step);
        self.history[start..]
            .iter()
            .take_while(|e| e.step == step)
            .cloned()
            .collect()
    }

    /// Drop events and snapshots once `current > step + lifetime`
    pub fn prune(&mut self, current: u64) {
        let events = self.event_lifetime;
        let keep = |e: &WorldEvent| current <= e.step.saturating_add(events);
        self.active.retain(keep);
        self.history.retain(keep);

        let snapshots = self.snapshot_lifetime;
        while self
            .snapshots
            .front()
            .is_some_and(|s| current > s.step.saturating_add(snapshots))
        {
            self.snapshots.pop_front();
        }
    }

    /// Record a snapshot, replacing any later ones
    pub fn push_snapshot(&mut self, snapshot: WorldSnapshot) {
        while self.snapshots.back().is_some_and(|s| s.step >= snapshot.step) {
            self.snapshots.pop_back();
        }
        self.snapshots.push_back(snapshot);
    }

    /// Forget snapshots taken after `step`; they describe a timeline that
    /// is about to be replayed differently
    pub fn discard_snapshots_after(&mut self, step: u64) {
        while self.snapshots.back().is_some_and(|s| s.step > step) {
            self.snapshots.pop_back();
        }
    }

    pub fn snapshot_at(&self, step: u64) -> Option<&WorldSnapshot> {
        self.snapshots.iter().find(|s| s.step == step)
    }

    pub fn latest_snapshot(&self) -> Option<&WorldSnapshot> {
        self.snapshots.back()
    }

    /// Newest snapshot no later than `step`
    pub fn snapshot_at_or_before(&self, step: u64) -> Option<&WorldSnapshot> {
        self.snapshots.iter().rev().find(|s| s.step <= step)
    }

    /// Start a new timeline from `snapshot`
    ///
    /// Snapshots and past events from the old timeline are dropped; events
    /// due at or after the snapshot's step stay queued.
    pub fn reset_to(&mut self, snapshot: WorldSnapshot) {
        let step = snapshot.step;
        self.active.retain(|e| e.step >= step);
        self.history.retain(|e| e.step >= step);
        self.snapshots.clear();
        self.snapshots.push_back(snapshot);
    }
}
