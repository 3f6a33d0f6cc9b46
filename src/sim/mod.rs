//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only (one step = 1/`steps_per_second` s)
//! - Stable iteration order (descriptor order, then paddle index)
//! - Every external change enters as a step-stamped event
//! - No networking or platform dependencies

pub mod collision;
pub mod events;
pub mod field;
pub mod geometry;
pub mod state;
pub mod world;

pub use collision::{Hit, ResolveOutcome, earliest_hit, recover_if_escaped, resolve};
pub use events::{EventBuffer, Insertion, WorldEvent, WorldSnapshot};
pub use field::{CollisionLine, Field, LevelDescriptor, PaddleSpec, SegmentKind, SegmentSpec};
pub use geometry::Line;
pub use state::{Ball, EntityId, EntityState, GameEvent, Paddle, Team, UserId};
pub use world::{Phase, StartOptions, World};
