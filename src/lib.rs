//! Multipong - peer-synchronized Pong simulation core
//!
//! Core modules:
//! - `sim`: Deterministic simulation (geometry, field, entities, collisions, stepping, replay)
//! - `net`: Session orchestration over an abstract broadcast channel
//! - `settings`: Data-driven simulation tuning
//! - `error`: Fallible setup (levels, settings, payloads)

pub mod error;
pub mod net;
pub mod settings;
pub mod sim;

pub use error::{Error, Result};
pub use settings::Settings;

/// Game configuration constants
pub mod consts {
    /// Fixed simulation rate (steps per second)
    pub const STEPS_PER_SECOND: u32 = 300;
    /// Entity periodic logic runs every N steps
    pub const TICK_INTERVAL: u64 = 2;
    /// Snapshot capture cadence (steps)
    pub const SNAPSHOT_INTERVAL: u64 = 30;
    /// Event retention window (steps)
    pub const EVENT_LIFETIME: u64 = 300;
    /// Snapshot retention window (steps)
    pub const SNAPSHOT_LIFETIME: u64 = 300;

    /// Ball speed cap (units per step)
    pub const BALL_MAX_SPEED: f32 = 4.0;
    /// Speed given to a ball recovered from outside the field
    pub const BALL_RECOVERY_SPEED: f32 = 1.5;
    /// Slack around the field before a ball counts as escaped
    pub const FIELD_MARGIN: f32 = 50.0;

    /// Paddle face length
    pub const PADDLE_LENGTH: f32 = 80.0;
    /// Paddle depth
    pub const PADDLE_THICKNESS: f32 = 12.0;
    /// Largest deflection from the face normal for an edge hit (radians, ~60 degrees)
    pub const MAX_BOUNCE_ANGLE: f32 = std::f32::consts::FRAC_PI_3;

    /// Paddle ownership expires after this long without input
    pub const OWNER_TIMEOUT_MS: u64 = 3000;
    /// Outbound position/ping rate limit
    pub const SEND_INTERVAL_MS: u64 = 50;
    /// Ownership keep-alive rate while a paddle is held without moving
    pub const PING_INTERVAL_MS: u64 = 1000;
    /// Desync-check broadcast cadence (steps)
    pub const DESYNC_CHECK_INTERVAL: u64 = 600;
    /// Largest position/velocity difference two peers may disagree by
    pub const DESYNC_TOLERANCE: f32 = 0.5;
    /// Paddle rotation per unit of wheel delta (radians)
    pub const SCROLL_ROTATION: f32 = 0.002;

    /// Hard cap on bounces resolved inside a single step
    pub const MAX_BOUNCES_PER_STEP: u32 = 16;
    /// Time-of-impact tolerance
    pub const TOI_EPSILON: f32 = 1e-4;
    /// Distance a bounced ball is set back from the struck segment
    pub const CONTACT_OFFSET: f32 = 1e-3;
}

/// Convert a wall-clock duration into whole simulation steps
#[inline]
pub fn ms_to_steps(ms: u64, steps_per_second: u32) -> u64 {
    ms * steps_per_second as u64 / 1000
}
