//! Fixed-step world stepper
//!
//! Owns the entities, the event buffer and the step counter. The caller
//! drives time by asking for a target step; every step in between runs the
//! same ordered pipeline so peers that see the same events compute the same
//! world:
//!
//! 1. play events due at this step
//! 2. periodic entity logic (ownership expiry) every `tick_interval`
//! 3. paddle motion
//! 4. ball collision resolution
//! 5. speed cap and escape recovery
//! 6. step counter advances; snapshot every `snapshot_interval`, prune

use glam::Vec2;

use super::collision::{self, Hit};
use super::events::{EventBuffer, Insertion, WorldEvent, WorldSnapshot};
use super::field::Field;
use super::state::{Ball, EntityId, EntityState, GameEvent, Paddle, Team, UserId};
use crate::settings::Settings;

/// Lifecycle of a world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Parameters for [`World::start`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Initial team scores; missing teams start at 0
    pub scores: Vec<i32>,
    /// Goal index whose serve velocity launches the first ball
    pub serve: usize,
}

/// The simulated match
#[derive(Debug, Clone)]
pub struct World {
    field: Field,
    settings: Settings,
    phase: Phase,
    step: u64,
    ball: Ball,
    paddles: Vec<Paddle>,
    teams: Vec<Team>,
    buffer: EventBuffer,
    /// Outbound signals since the last drain
    events: Vec<GameEvent>,
    /// Set while re-simulating after a rewind
    replaying: bool,
}

impl World {
    pub fn new(field: Field, settings: Settings) -> Self {
        let buffer = EventBuffer::new(settings.event_lifetime, settings.snapshot_lifetime);
        let ball = Ball::new(field.center(), Vec2::ZERO);
        Self {
            field,
            settings,
            phase: Phase::Idle,
            step: 0,
            ball,
            paddles: Vec::new(),
            teams: Vec::new(),
            buffer,
            events: Vec::new(),
            replaying: false,
        }
    }

    /// Build teams, paddles and the ball from the field and begin at step 0
    pub fn start(&mut self, options: StartOptions) {
        let players = self.field.players;
        self.teams = (0..players)
            .map(|id| Team::new(id, options.scores.get(id).copied().unwrap_or(0)))
            .collect();
        self.paddles = self
            .field
            .paddles
            .iter()
            .enumerate()
            .map(|(index, spec)| Paddle::from_spec(index, index % players, spec))
            .collect();
        for paddle in &self.paddles {
            self.teams[paddle.team].paddles.push(paddle.index);
        }
        self.ball = Ball::new(
            self.field.center(),
            self.settings.serve_velocity(players, options.serve),
        );

        self.step = 0;
        self.events.clear();
        self.buffer.clear();
        self.buffer.push_snapshot(self.create_snapshot());
        self.phase = Phase::Running;
        log::info!(
            "World started: {} players, {} paddles, scores {:?}",
            players,
            self.paddles.len(),
            self.teams.iter().map(|t| t.score).collect::<Vec<_>>()
        );
    }

    /// Halt stepping; state stays readable
    pub fn stop(&mut self) {
        if self.phase == Phase::Running {
            log::info!("World stopped at step {}", self.step);
        }
        self.phase = Phase::Stopped;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    pub fn paddles(&self) -> &[Paddle] {
        &self.paddles
    }

    pub fn paddle(&self, index: usize) -> Option<&Paddle> {
        self.paddles.get(index)
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    /// Take the signals produced since the last call
    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Queue a locally originated change for the current step
    pub fn create_event(&mut self, event: WorldEvent) -> WorldEvent {
        self.buffer.create_event(event, self.step)
    }

    /// Accept an event stamped with its own step
    ///
    /// Past events inside the replay window rewind the world to the
    /// nearest snapshot and re-simulate up to the current step. Without a
    /// snapshot to rewind to, the change is applied immediately instead.
    pub fn insert_event(&mut self, event: WorldEvent) -> Insertion {
        let insertion = self.buffer.insert(event.clone(), self.step);
        if let Insertion::Rewind(step) = insertion
            && !self.rewind(step)
        {
            log::debug!("No snapshot at or before step {step}, applying {} late", event.target);
            self.play_event(&event);
        }
        insertion
    }

    /// Advance to `target`, returning how many steps ran
    ///
    /// Steps run in fast mode except the last one and those landing on the
    /// snapshot grid, so grid snapshots exist however the caller batches.
    pub fn step_to(&mut self, target: u64) -> u64 {
        if self.phase != Phase::Running {
            return 0;
        }
        let interval = self.settings.snapshot_interval;
        let mut ran = 0;
        while self.step < target {
            let next = self.step + 1;
            let fast = next < target && next % interval != 0;
            self.tick(fast);
            ran += 1;
        }
        ran
    }

    /// Effective owner of paddle `index` at the current step
    ///
    /// An owner past the input timeout counts as gone even before periodic
    /// logic has released the paddle.
    pub fn owner(&self, index: usize) -> Option<UserId> {
        let paddle = self.paddles.get(index)?;
        paddle.owner_at(self.step, self.settings.owner_timeout_steps())
    }

    fn tick(&mut self, fast: bool) {
        let step = self.step;

        let due = if self.replaying {
            self.buffer.replay_events(step)
        } else {
            self.buffer.take_due(step)
        };
        for event in &due {
            self.play_event(event);
        }

        if !fast && step % self.settings.tick_interval == 0 {
            self.periodic();
        }

        for paddle in &mut self.paddles {
            paddle.advance(&self.field);
        }

        let outcome = collision::resolve(
            &mut self.ball,
            &mut self.teams,
            &self.paddles,
            &self.field,
            &self.settings,
        );
        if !self.replaying {
            for hit in &outcome.hits {
                self.events.push(match *hit {
                    Hit::Wall => GameEvent::WallHit { step },
                    Hit::Paddle(paddle) => GameEvent::PaddleHit { paddle, step },
                    Hit::Goal(team) => GameEvent::Goal { team, step },
                });
            }
        }
        if let Some(goal) = outcome.goal {
            log::info!(
                "Goal {goal} at step {step}, scores {:?}",
                self.teams.iter().map(|t| t.score).collect::<Vec<_>>()
            );
        }

        self.ball.clamp_speed(self.settings.max_ball_speed);
        if collision::recover_if_escaped(&mut self.ball, &self.field, &self.settings)
            && !self.replaying
        {
            self.events.push(GameEvent::BallRecovered { step });
        }

        self.step += 1;
        let capture = if self.replaying {
            // Rewinding discarded these; desync checks look them up
            self.step % self.settings.snapshot_interval == 0
        } else {
            !fast && self.snapshot_due()
        };
        if capture {
            self.buffer.push_snapshot(self.create_snapshot());
        }
        self.buffer.prune(self.step);
    }

    /// On the snapshot grid, or the newest snapshot is a full interval old
    ///
    /// Off-grid snapshots only serve rewinds; desync checks compare grid
    /// steps.
    fn snapshot_due(&self) -> bool {
        let interval = self.settings.snapshot_interval;
        self.step % interval == 0
            || self
                .buffer
                .latest_snapshot()
                .is_none_or(|s| self.step >= s.step + interval)
    }

    /// Release paddles whose owners went quiet
    fn periodic(&mut self) {
        let timeout = self.settings.owner_timeout_steps();
        for paddle in &mut self.paddles {
            if let Some(user) = paddle.expire_owner(self.step, timeout) {
                log::info!("Paddle {} released by user {user} (idle)", paddle.index);
                if !self.replaying {
                    self.events.push(GameEvent::OwnerReleased {
                        paddle: paddle.index,
                        user,
                    });
                }
            }
        }
    }

    fn play_event(&mut self, event: &WorldEvent) {
        match event.target {
            EntityId::Ball => {
                if let Some(pos) = event.position {
                    self.ball.pos = pos;
                }
                if let Some(vel) = event.velocity {
                    self.ball.vel = vel;
                }
            }
            EntityId::Paddle(index) => {
                let (step, timeout) = (self.step, self.settings.owner_timeout_steps());
                let Some(paddle) = self.paddles.get_mut(index) else {
                    log::warn!("Event for unknown entity {}", event.target);
                    return;
                };
                if let Some(user) = event.user {
                    if let Some(idle) = paddle.expire_owner(step, timeout) {
                        log::info!("Paddle {index} released by user {idle} (idle)");
                        if !self.replaying {
                            self.events.push(GameEvent::OwnerReleased { paddle: index, user: idle });
                        }
                    }
                    let newly = paddle.owner.is_none();
                    if !paddle.claim(user, event.step) {
                        log::debug!("User {user} cannot move paddle {index} (owned by {:?})", paddle.owner);
                        return;
                    }
                    if newly && !self.replaying {
                        log::info!("Paddle {index} claimed by user {user}");
                        self.events.push(GameEvent::OwnerClaimed { paddle: index, user });
                    }
                }
                if let Some(pos) = event.position {
                    if self.field.area_contains(index, pos) {
                        paddle.pos = pos;
                    } else {
                        log::debug!("Paddle {index} position {pos:?} outside its area");
                    }
                }
                if let Some(rotation) = event.rotation {
                    paddle.rotation = rotation;
                }
                if let Some(vel) = event.velocity {
                    paddle.vel = vel;
                }
                if let Some(angular_vel) = event.angular_velocity {
                    paddle.angular_vel = angular_vel;
                }
            }
            EntityId::Team(index) => {
                let Some(team) = self.teams.get_mut(index) else {
                    log::warn!("Event for unknown entity {}", event.target);
                    return;
                };
                if let Some(score) = event.score {
                    team.score = score;
                }
            }
        }
    }

    /// Serialize every entity at the current step
    pub fn create_snapshot(&self) -> WorldSnapshot {
        let mut entities = Vec::with_capacity(1 + self.paddles.len() + self.teams.len());
        entities.push(EntityState::Ball(self.ball.clone()));
        entities.extend(self.paddles.iter().cloned().map(EntityState::Paddle));
        entities.extend(self.teams.iter().cloned().map(EntityState::Team));
        WorldSnapshot {
            step: self.step,
            entities,
        }
    }

    /// Overwrite entities from `snapshot` and move the step counter to it
    ///
    /// Entities the world does not have are skipped with a warning.
    pub fn load_snapshot(&mut self, snapshot: &WorldSnapshot) {
        for entity in &snapshot.entities {
            match entity {
                EntityState::Ball(ball) => self.ball = ball.clone(),
                EntityState::Paddle(paddle) => match self.paddles.get_mut(paddle.index) {
                    Some(slot) => *slot = paddle.clone(),
                    None => log::warn!("Snapshot has unknown entity {}", entity.id()),
                },
                EntityState::Team(team) => match self.teams.get_mut(team.id) {
                    Some(slot) => *slot = team.clone(),
                    None => log::warn!("Snapshot has unknown entity {}", entity.id()),
                },
            }
        }
        self.step = snapshot.step;
    }

    /// Adopt a peer's snapshot as the new timeline
    pub fn resync(&mut self, snapshot: WorldSnapshot) {
        log::info!("Resynchronizing from step {} to step {}", self.step, snapshot.step);
        self.load_snapshot(&snapshot);
        self.buffer.reset_to(snapshot);
    }

    /// Re-simulate from the newest snapshot at or before `step`
    fn rewind(&mut self, step: u64) -> bool {
        let Some(snapshot) = self.buffer.snapshot_at_or_before(step).cloned() else {
            return false;
        };
        let target = self.step;
        log::debug!("Rewinding to step {} and replaying to {target}", snapshot.step);
        self.load_snapshot(&snapshot);
        self.buffer.discard_snapshots_after(snapshot.step);
        self.replaying = true;
        while self.step < target {
            self.tick(true);
        }
        self.replaying = false;
        true
    }
}
