//! Simulation tuning
//!
//! Every peer in a match must run with identical settings; the values
//! below feed the stepper, resolver, event buffer and session throttling.

use std::collections::BTreeMap;
use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::{Error, Result};
use crate::ms_to_steps;

/// Simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Clock ===
    /// Fixed steps per wall-clock second
    pub steps_per_second: u32,
    /// Periodic entity logic cadence (steps)
    pub tick_interval: u64,
    /// Snapshot capture cadence (steps)
    pub snapshot_interval: u64,

    // === Replay window ===
    /// Events older than this many steps are pruned
    pub event_lifetime: u64,
    /// Snapshots older than this many steps are pruned
    pub snapshot_lifetime: u64,

    // === Ball ===
    /// Speed cap (units per step)
    pub max_ball_speed: f32,
    /// Speed of a ball recovered from outside the field
    pub recovery_speed: f32,
    /// Field slack before a ball counts as escaped
    pub field_margin: f32,
    /// Serve velocity after a goal, by player count then goal index
    pub ball_velocity: BTreeMap<usize, Vec<Vec2>>,
    /// Bounce cap inside one step
    pub max_bounces_per_step: u32,

    // === Paddles ===
    pub paddle_length: f32,
    pub paddle_thickness: f32,
    /// Deflection at the very end of a paddle face (radians)
    pub max_bounce_angle: f32,
    /// Ownership released after this long without input
    pub owner_timeout_ms: u64,
    /// Rotation per unit of wheel delta (radians)
    pub scroll_rotation: f32,

    // === Network ===
    /// Minimum time between outbound position/ping messages
    pub send_interval_ms: u64,
    /// Keep-alive cadence while holding a paddle without moving it
    pub ping_interval_ms: u64,
    /// Desync-check broadcast cadence (steps, 0 disables)
    pub desync_check_interval: u64,
    /// Allowed drift before two snapshots count as diverged
    pub desync_tolerance: f32,
}

impl Default for Settings {
    fn default() -> Self {
        let mut ball_velocity = BTreeMap::new();
        ball_velocity.insert(2, vec![Vec2::new(-1.5, 0.5), Vec2::new(1.5, -0.5)]);
        ball_velocity.insert(
            4,
            vec![
                Vec2::new(1.5, 0.4),
                Vec2::new(-1.5, -0.4),
                Vec2::new(0.4, 1.5),
                Vec2::new(-0.4, -1.5),
            ],
        );

        Self {
            steps_per_second: STEPS_PER_SECOND,
            tick_interval: TICK_INTERVAL,
            snapshot_interval: SNAPSHOT_INTERVAL,

            event_lifetime: EVENT_LIFETIME,
            snapshot_lifetime: SNAPSHOT_LIFETIME,

            max_ball_speed: BALL_MAX_SPEED,
            recovery_speed: BALL_RECOVERY_SPEED,
            field_margin: FIELD_MARGIN,
            ball_velocity,
            max_bounces_per_step: MAX_BOUNCES_PER_STEP,

            paddle_length: PADDLE_LENGTH,
            paddle_thickness: PADDLE_THICKNESS,
            max_bounce_angle: MAX_BOUNCE_ANGLE,
            owner_timeout_ms: OWNER_TIMEOUT_MS,
            scroll_rotation: SCROLL_ROTATION,

            send_interval_ms: SEND_INTERVAL_MS,
            ping_interval_ms: PING_INTERVAL_MS,
            desync_check_interval: DESYNC_CHECK_INTERVAL,
            desync_tolerance: DESYNC_TOLERANCE,
        }
    }
}

impl Settings {
    /// Parse settings JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json).map_err(Error::SettingsParse)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Reject values the stepper cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidSettings(msg.to_string()));
        if self.steps_per_second == 0 {
            return invalid("steps_per_second must be positive");
        }
        if self.tick_interval == 0 || self.snapshot_interval == 0 {
            return invalid("tick and snapshot intervals must be positive");
        }
        if !(self.max_ball_speed > 0.0) {
            return invalid("max_ball_speed must be positive");
        }
        if self.max_bounces_per_step == 0 {
            return invalid("max_bounces_per_step must be positive");
        }
        if !(self.desync_tolerance >= 0.0) {
            return invalid("desync_tolerance must not be negative");
        }
        if self.ball_velocity.values().any(|v| v.is_empty()) {
            return invalid("ball_velocity entries must not be empty");
        }
        Ok(())
    }

    /// Serve velocity after `goal` was crossed in a `players` match
    pub fn serve_velocity(&self, players: usize, goal: usize) -> Vec2 {
        self.ball_velocity
            .get(&players)
            .and_then(|table| table.get(goal).or_else(|| table.first()))
            .copied()
            .unwrap_or(Vec2::new(self.recovery_speed, 0.0))
    }

    /// Ownership timeout in steps
    pub fn owner_timeout_steps(&self) -> u64 {
        ms_to_steps(self.owner_timeout_ms, self.steps_per_second)
    }

    /// Target step count after `elapsed_ms` of wall-clock time
    pub fn steps_for_elapsed(&self, elapsed_ms: u64) -> u64 {
        ms_to_steps(elapsed_ms, self.steps_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.owner_timeout_steps(), 900);
        assert_eq!(settings.steps_for_elapsed(1000), 300);
        assert_eq!(settings.steps_for_elapsed(5), 1);
        assert_eq!(settings.steps_for_elapsed(3), 0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = Settings::from_json(r#"{"event_lifetime": 120, "max_ball_speed": 2.5}"#)
            .unwrap();
        assert_eq!(settings.event_lifetime, 120);
        assert_eq!(settings.max_ball_speed, 2.5);
        assert_eq!(settings.snapshot_lifetime, SNAPSHOT_LIFETIME);
    }

    #[test]
    fn test_velocity_table_json() {
        let settings =
            Settings::from_json(r#"{"ball_velocity": {"2": [[1, 0], [-1, 0]]}}"#).unwrap();
        assert_eq!(settings.serve_velocity(2, 1), Vec2::new(-1.0, 0.0));
        // Out-of-range goal falls back to the first entry
        assert_eq!(settings.serve_velocity(2, 9), Vec2::new(1.0, 0.0));
        // Unknown player count falls back to recovery speed along +x
        assert_eq!(
            settings.serve_velocity(6, 0),
            Vec2::new(settings.recovery_speed, 0.0)
        );
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            Settings::from_json(r#"{"tick_interval": 0}"#),
            Err(Error::InvalidSettings(_))
        ));
        assert!(matches!(
            Settings::from_json(r#"{"ball_velocity": {"2": []}}"#),
            Err(Error::InvalidSettings(_))
        ));
        assert!(matches!(
            Settings::from_json("[]"),
            Err(Error::SettingsParse(_))
        ));
    }
}
