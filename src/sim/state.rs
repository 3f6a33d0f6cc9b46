//! Entities and their serializable state
//!
//! Everything a snapshot must carry to rebuild a peer's world lives here.

use std::fmt;
use std::str::FromStr;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::field::{CollisionLine, Field, PaddleSpec, SegmentKind};
use super::geometry::{is_in_convex_hull, rotate};
use crate::error::Error;

/// Player identity as assigned by the (external) session layer
pub type UserId = u64;

/// Name of an entity that events and snapshots can target
///
/// Serialized as `"ball"`, `"paddle<n>"` or `"team<n>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityId {
    Ball,
    Paddle(usize),
    Team(usize),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Ball => write!(f, "ball"),
            EntityId::Paddle(i) => write!(f, "paddle{i}"),
            EntityId::Team(i) => write!(f, "team{i}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let index = |rest: &str| rest.parse::<usize>().map_err(|_| Error::EntityName(s.into()));
        if s == "ball" {
            Ok(EntityId::Ball)
        } else if let Some(rest) = s.strip_prefix("paddle") {
            index(rest).map(EntityId::Paddle)
        } else if let Some(rest) = s.strip_prefix("team") {
            index(rest).map(EntityId::Team)
        } else {
            Err(Error::EntityName(s.into()))
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

/// Signals for render/audio hosts, drained after stepping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    /// Ball bounced off a wall
    WallHit { step: u64 },
    /// Ball bounced off a paddle
    PaddleHit { paddle: usize, step: u64 },
    /// Ball crossed a goal line
    Goal { team: usize, step: u64 },
    /// Ball escaped the field and was reset
    BallRecovered { step: u64 },
    /// A user took control of a paddle
    OwnerClaimed { paddle: usize, user: UserId },
    /// A paddle's owner timed out
    OwnerReleased { paddle: usize, user: UserId },
}

/// The ball
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub pos: Vec2,
    /// Units per step
    pub vel: Vec2,
}

impl Ball {
    pub fn new(pos: Vec2, vel: Vec2) -> Self {
        Self { pos, vel }
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        self.vel.length()
    }

    /// Scale velocity down to `max` if faster; returns whether it was clamped
    pub fn clamp_speed(&mut self, max: f32) -> bool {
        let speed = self.speed();
        if speed > max {
            self.vel *= max / speed;
            true
        } else {
            false
        }
    }

    /// Place the ball at `pos` with a fresh velocity
    pub fn reset(&mut self, pos: Vec2, vel: Vec2) {
        self.pos = pos;
        self.vel = vel;
    }
}

/// A player paddle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paddle {
    pub index: usize,
    pub team: usize,
    pub pos: Vec2,
    /// Rotation of the paddle frame (radians); 0 keeps the face vertical
    pub rotation: f32,
    /// Units per step
    pub vel: Vec2,
    /// Radians per step
    pub angular_vel: f32,
    /// Spin factor
    pub cf: f32,
    /// Speed factor
    pub cs: f32,
    /// Controlling user, if claimed
    pub owner: Option<UserId>,
    /// Step of the owner's latest input
    pub last_input: u64,
}

impl Paddle {
    pub fn from_spec(index: usize, team: usize, spec: &PaddleSpec) -> Self {
        Self {
            index,
            team,
            pos: Vec2::new(spec.x, spec.y),
            rotation: spec.angle,
            vel: Vec2::ZERO,
            angular_vel: 0.0,
            cf: spec.cf,
            cs: spec.cs,
            owner: None,
            last_input: 0,
        }
    }

    /// Claim (or refresh) ownership for `user` at step `now`
    ///
    /// Fails when another user holds the paddle.
    pub fn claim(&mut self, user: UserId, now: u64) -> bool {
        match self.owner {
            Some(owner) if owner != user => false,
            _ => {
                self.owner = Some(user);
                self.last_input = self.last_input.max(now);
                true
            }
        }
    }

    pub fn release(&mut self) -> Option<UserId> {
        self.owner.take()
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == Some(user)
    }

    /// Owner unless `now - last_input > timeout`
    pub fn owner_at(&self, now: u64, timeout: u64) -> Option<UserId> {
        self.owner
            .filter(|_| now.saturating_sub(self.last_input) <= timeout)
    }

    /// Release ownership once `now - last_input > timeout`
    pub fn expire_owner(&mut self, now: u64, timeout: u64) -> Option<UserId> {
        if self.owner.is_some() && self.owner_at(now, timeout).is_none() {
            self.release()
        } else {
            None
        }
    }

    /// Rectangle corners in winding order
    pub fn corners(&self, length: f32, thickness: f32) -> [Vec2; 4] {
        let hx = thickness / 2.0;
        let hy = length / 2.0;
        [
            Vec2::new(-hx, -hy),
            Vec2::new(hx, -hy),
            Vec2::new(hx, hy),
            Vec2::new(-hx, hy),
        ]
        .map(|local| self.pos + rotate(local, self.rotation))
    }

    /// Collision edges for the current pose
    pub fn edges(&self, length: f32, thickness: f32) -> [CollisionLine; 4] {
        let c = self.corners(length, thickness);
        let kind = SegmentKind::PaddleEdge(self.index);
        [
            CollisionLine::new(c[0], c[1], kind),
            CollisionLine::new(c[1], c[2], kind),
            CollisionLine::new(c[2], c[3], kind),
            CollisionLine::new(c[3], c[0], kind),
        ]
    }

    /// Whether `point` is strictly inside the paddle body
    pub fn contains(&self, point: Vec2, length: f32, thickness: f32) -> bool {
        let lines = self.edges(length, thickness).map(|e| e.line);
        is_in_convex_hull(point, &lines, false)
    }

    /// Integrate motion for one step, staying inside the paddle's area
    pub fn advance(&mut self, field: &Field) {
        if self.vel != Vec2::ZERO {
            let next = self.pos + self.vel;
            if field.area_contains(self.index, next) {
                self.pos = next;
            } else {
                self.vel = Vec2::ZERO;
            }
        }
        if self.angular_vel != 0.0 {
            self.rotation += self.angular_vel;
        }
    }
}

/// A team and its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: usize,
    pub score: i32,
    pub paddles: Vec<usize>,
}

impl Team {
    pub fn new(id: usize, score: i32) -> Self {
        Self {
            id,
            score,
            paddles: Vec::new(),
        }
    }
}

/// Serialized form of any entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityState {
    Ball(Ball),
    Paddle(Paddle),
    Team(Team),
}

impl EntityState {
    pub fn id(&self) -> EntityId {
        match self {
            EntityState::Ball(_) => EntityId::Ball,
            EntityState::Paddle(p) => EntityId::Paddle(p.index),
            EntityState::Team(t) => EntityId::Team(t.id),
        }
    }
}
