//! Time-of-impact collision resolution
//!
//! The ball is swept as a ray against every collision segment. The nearest
//! impact within the remaining time budget is resolved, then the search
//! repeats with what is left of the budget until one full step is used up.

use glam::Vec2;

use super::field::{CollisionLine, Field, SegmentKind};
use super::geometry::{intersection, normalize_or, paddle_bounce, reflect, tangent};
use super::state::{Ball, Paddle, Team};
use crate::consts::{CONTACT_OFFSET, TOI_EPSILON};
use crate::settings::Settings;

/// Nearest impact found by [`earliest_hit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impact {
    /// Index into the candidate segment list
    pub index: usize,
    /// Fraction of the ball's per-step velocity travelled before impact
    pub t_ray: f32,
    /// Impact parameter along the segment (0..1)
    pub t_segment: f32,
    pub segment: CollisionLine,
}

/// What one resolved collision did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    Wall,
    Paddle(usize),
    Goal(usize),
}

/// Result of resolving one step of ball motion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveOutcome {
    /// Total time budget used (1.0 for a full step)
    pub consumed: f32,
    /// Collisions in the order they were resolved
    pub hits: Vec<Hit>,
    /// Goal crossed this step, if any
    pub goal: Option<usize>,
}

/// Field segments followed by each paddle's edges
///
/// The order is fixed (descriptor order, then paddle index, then edge
/// winding) so every peer breaks time-of-impact ties identically. Paddles
/// that currently contain the ball contribute no edges, letting an
/// overlapped ball leave freely.
pub fn collision_set(
    field: &Field,
    paddles: &[Paddle],
    ball_pos: Vec2,
    settings: &Settings,
) -> Vec<CollisionLine> {
    let mut segments = Vec::with_capacity(field.segments().len() + paddles.len() * 4);
    segments.extend_from_slice(field.segments());
    for paddle in paddles {
        if paddle.contains(ball_pos, settings.paddle_length, settings.paddle_thickness) {
            continue;
        }
        segments.extend(paddle.edges(settings.paddle_length, settings.paddle_thickness));
    }
    segments
}

/// Find the first segment the ball reaches within `remaining`
///
/// A candidate is valid when `0 <= t_segment <= 1`,
/// `-TOI_EPSILON < t_ray <= remaining` and the ball is closing on the
/// segment from the side it is on. A ball lying on the line (within half
/// of [`CONTACT_OFFSET`]) counts as closing from either side. `touching`
/// lists segments the ball is resting on after a bounce at its current
/// position; they are excluded so a reflection cannot re-collide in zero
/// time. Ties keep the earliest candidate.
pub fn earliest_hit(
    pos: Vec2,
    vel: Vec2,
    segments: &[CollisionLine],
    remaining: f32,
    touching: &[usize],
) -> Option<Impact> {
    let mut best: Option<Impact> = None;
    for (index, segment) in segments.iter().enumerate() {
        if touching.contains(&index) {
            continue;
        }
        let Some((t_ray, t_segment)) =
            intersection(pos, vel, segment.line.p0, segment.line.direction())
        else {
            continue;
        };
        if !(0.0..=1.0).contains(&t_segment) || t_ray <= -TOI_EPSILON || t_ray > remaining {
            continue;
        }
        let normal = segment.line.normal();
        let side = (pos - segment.line.p0).dot(normal);
        if side.abs() > CONTACT_OFFSET * 0.5 && side * vel.dot(normal) >= 0.0 {
            // Leaving the segment
            continue;
        }
        if best.is_none_or(|b| t_ray < b.t_ray) {
            best = Some(Impact {
                index,
                t_ray,
                t_segment,
                segment: *segment,
            });
        }
    }
    best
}

/// Apply a goal on `goal`'s line to the team scores
///
/// Two-player matches credit the team named by the goal; larger matches
/// debit the team defending it.
pub fn score_goal(teams: &mut [Team], players: usize, goal: usize) {
    let Some(team) = teams.get_mut(goal) else {
        log::warn!("Goal {goal} has no team ({} teams)", teams.len());
        return;
    };
    if players == 2 {
        team.score += 1;
    } else {
        team.score -= 1;
    }
    log::debug!("Team {} score now {}", team.id, team.score);
}

/// Advance the ball through one full step, bouncing as needed
pub fn resolve(
    ball: &mut Ball,
    teams: &mut [Team],
    paddles: &[Paddle],
    field: &Field,
    settings: &Settings,
) -> ResolveOutcome {
    let segments = collision_set(field, paddles, ball.pos, settings);
    let mut outcome = ResolveOutcome::default();
    let mut remaining = 1.0_f32;
    let mut touching: Vec<usize> = Vec::new();

    while remaining > 0.0 {
        if outcome.hits.len() as u32 >= settings.max_bounces_per_step {
            // Pinned between segments; hold position for the rest of the step
            log::warn!(
                "Ball exceeded {} bounces in one step at {:?}",
                settings.max_bounces_per_step,
                ball.pos
            );
            outcome.consumed += remaining;
            break;
        }

        let Some(impact) = earliest_hit(ball.pos, ball.vel, &segments, remaining, &touching) else {
            ball.pos += ball.vel * remaining;
            outcome.consumed += remaining;
            break;
        };

        let t = impact.t_ray.max(0.0);
        // Normal on the side the ball arrives from
        let normal = impact.segment.line.normal();
        let approach = if ball.vel.dot(normal) > 0.0 { -normal } else { normal };
        ball.pos += ball.vel * t;
        outcome.consumed += t;
        remaining -= t;
        if t > TOI_EPSILON {
            touching.clear();
        }
        touching.push(impact.index);

        match impact.segment.kind {
            SegmentKind::Goal(goal) => {
                score_goal(teams, field.players, goal);
                ball.reset(field.center(), settings.serve_velocity(field.players, goal));
                outcome.hits.push(Hit::Goal(goal));
                outcome.goal = Some(goal);
                // The rest of the step is forfeited to the re-serve
                outcome.consumed += remaining;
                break;
            }
            SegmentKind::PaddleEdge(index) => {
                ball.pos += approach * CONTACT_OFFSET;
                let (cf, cs) = paddles
                    .iter()
                    .find(|p| p.index == index)
                    .map_or((1.0, 1.0), |p| (p.cf, p.cs));
                ball.vel = paddle_bounce(
                    &impact.segment.line,
                    impact.t_segment,
                    ball.vel,
                    cf,
                    cs,
                    settings.max_bounce_angle,
                );
                outcome.hits.push(Hit::Paddle(index));
            }
            SegmentKind::Wall => {
                ball.pos += approach * CONTACT_OFFSET;
                ball.vel = reflect(ball.vel, impact.segment.line.normal());
                outcome.hits.push(Hit::Wall);
            }
        }

        ball.clamp_speed(settings.max_ball_speed);
    }

    outcome
}

/// Reset a ball that drifted outside the field
///
/// The ball returns to the center moving tangentially to the direction it
/// escaped in. Returns whether a reset happened.
pub fn recover_if_escaped(ball: &mut Ball, field: &Field, settings: &Settings) -> bool {
    if field.contains(ball.pos, settings.field_margin) && ball.vel.is_finite() {
        return false;
    }
    let center = field.center();
    let outward = if ball.pos.is_finite() {
        normalize_or(ball.pos - center, Vec2::X)
    } else {
        Vec2::X
    };
    let vel = tangent(outward) * settings.recovery_speed;
    log::warn!(
        "Ball escaped field at {:?} (vel {:?}), resetting to center",
        ball.pos,
        ball.vel
    );
    ball.reset(center, vel);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::field::LevelDescriptor;
    use crate::sim::field::{PaddleSpec, SegmentSpec};
    use proptest::prelude::*;

    fn seg(name: &str, p0: (f32, f32), p1: (f32, f32)) -> SegmentSpec {
        SegmentSpec {
            name: name.into(),
            p0: Vec2::new(p0.0, p0.1),
            p1: Vec2::new(p1.0, p1.1),
        }
    }

    /// 100x100 box: walls top/bottom/right, goal1 on the left
    fn boxed_field() -> Field {
        Field::from_descriptor(LevelDescriptor {
            players: 2,
            width: 100.0,
            height: 100.0,
            paddles: vec![PaddleSpec {
                x: 10.0,
                y: 50.0,
                angle: 0.0,
                cf: 1.0,
                cs: 1.0,
            }],
            collisions: vec![
                seg("top", (0.0, 0.0), (100.0, 0.0)),
                seg("right", (100.0, 0.0), (100.0, 100.0)),
                seg("bottom", (100.0, 100.0), (0.0, 100.0)),
                seg("goal1", (0.0, 100.0), (0.0, 0.0)),
            ],
            areas: Vec::new(),
        })
        .unwrap()
    }

    /// Field where the only wall sits 5 units right of center
    fn near_wall_field() -> Field {
        Field::from_descriptor(LevelDescriptor {
            players: 2,
            width: 100.0,
            height: 100.0,
            paddles: vec![PaddleSpec {
                x: 10.0,
                y: 50.0,
                angle: 0.0,
                cf: 1.0,
                cs: 1.0,
            }],
            collisions: vec![seg("wall", (55.0, 0.0), (55.0, 100.0))],
            areas: Vec::new(),
        })
        .unwrap()
    }

    fn teams() -> Vec<Team> {
        vec![Team::new(0, 0), Team::new(1, 0)]
    }

    fn loose_settings() -> Settings {
        Settings {
            max_ball_speed: 50.0,
            ..Settings::default()
        }
    }

    #[test]
    fn test_straight_line_without_collision() {
        let field = boxed_field();
        let mut ball = Ball::new(Vec2::new(50.0, 50.0), Vec2::new(2.0, 1.0));
        let out = resolve(&mut ball, &mut teams(), &[], &field, &Settings::default());
        assert!(out.hits.is_empty());
        assert!((out.consumed - 1.0).abs() < 1e-6);
        assert_eq!(ball.pos, Vec2::new(52.0, 51.0));
    }

    #[test]
    fn test_wall_reflects_once() {
        let field = near_wall_field();
        let settings = loose_settings();
        let mut ball = Ball::new(field.center(), Vec2::new(10.0, 0.0));
        let out = resolve(&mut ball, &mut teams(), &[], &field, &settings);

        assert_eq!(out.hits, vec![Hit::Wall]);
        assert!((ball.vel - Vec2::new(-10.0, 0.0)).length() < 1e-4);
        assert!((out.consumed - 1.0).abs() < 1e-5);
        // 5 units to the wall, 5 back
        assert!((ball.pos - Vec2::new(50.0, 50.0)).length() < 1e-2);
    }

    #[test]
    fn test_goal_scores_and_reserves() {
        let field = boxed_field();
        let settings = Settings::default();
        let mut teams = teams();
        let mut ball = Ball::new(Vec2::new(1.0, 50.0), Vec2::new(-3.0, 0.0));
        let out = resolve(&mut ball, &mut teams, &[], &field, &settings);

        assert_eq!(out.goal, Some(1));
        assert_eq!(out.hits, vec![Hit::Goal(1)]);
        assert_eq!(teams[1].score, 1);
        assert_eq!(teams[0].score, 0);
        assert_eq!(ball.pos, field.center());
        assert_eq!(ball.vel, settings.serve_velocity(2, 1));
        assert!((out.consumed - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_four_player_goal_debits_defender() {
        let mut teams: Vec<Team> = (0..4).map(|i| Team::new(i, 5)).collect();
        score_goal(&mut teams, 4, 2);
        assert_eq!(teams[2].score, 4);
        score_goal(&mut teams, 2, 0);
        assert_eq!(teams[0].score, 6);
        // Unknown goal leaves everything alone
        score_goal(&mut teams, 4, 9);
        assert_eq!(teams.iter().map(|t| t.score).sum::<i32>(), 5 + 6 + 4 + 5);
    }

    #[test]
    fn test_bounce_at_step_end_stays_on_side() {
        let field = near_wall_field();
        let settings = loose_settings();
        // Reaches the wall at x = 55 exactly as the step ends
        let mut ball = Ball::new(Vec2::new(45.0, 50.0), Vec2::new(10.0, 0.0));
        let out = resolve(&mut ball, &mut teams(), &[], &field, &settings);
        assert_eq!(out.hits, vec![Hit::Wall]);
        assert!(ball.pos.x < 55.0);
        assert_eq!(ball.vel, Vec2::new(-10.0, 0.0));

        // Next step starts at the wall moving away from it
        let out = resolve(&mut ball, &mut teams(), &[], &field, &settings);
        assert!(out.hits.is_empty());
        assert!((ball.pos - Vec2::new(45.0, 50.0)).length() < 1e-2);
        assert_eq!(ball.vel, Vec2::new(-10.0, 0.0));
    }

    #[test]
    fn test_paddle_bounce_at_step_end_stays_on_side() {
        let field = near_wall_field();
        let settings = loose_settings();
        let paddle = Paddle::from_spec(
            0,
            0,
            &PaddleSpec {
                x: 30.0,
                y: 50.0,
                angle: 0.0,
                cf: 1.0,
                cs: 1.0,
            },
        );
        // Right face at x = 36, reached exactly at the end of the step
        let mut ball = Ball::new(Vec2::new(44.0, 50.0), Vec2::new(-8.0, 0.0));
        let out = resolve(&mut ball, &mut teams(), &[paddle.clone()], &field, &settings);
        assert_eq!(out.hits, vec![Hit::Paddle(0)]);
        assert!(ball.pos.x > 36.0);

        let out = resolve(&mut ball, &mut teams(), &[paddle], &field, &settings);
        assert!(out.hits.is_empty());
        assert!(ball.vel.x > 0.0);
        assert!((ball.pos - Vec2::new(44.0, 50.0)).length() < 1e-2);
    }

    #[test]
    fn test_leaving_segment_is_no_hit() {
        let wall = CollisionLine::new(Vec2::new(5.0, -1.0), Vec2::new(5.0, 1.0), SegmentKind::Wall);
        // Just inside the wall's line, heading back out
        let pos = Vec2::new(5.0 - CONTACT_OFFSET, 0.0);
        assert!(earliest_hit(pos, Vec2::new(-10.0, 0.0), &[wall], 1.0, &[]).is_none());
        // Same spot heading in
        let hit = earliest_hit(pos, Vec2::new(10.0, 0.0), &[wall], 1.0, &[]).unwrap();
        assert!(hit.t_ray < 1e-3);
    }

    #[test]
    fn test_corner_bounces_twice() {
        let field = boxed_field();
        let settings = loose_settings();
        // Heads into the top-right corner exactly
        let mut ball = Ball::new(Vec2::new(96.0, 4.0), Vec2::new(8.0, -8.0));
        let out = resolve(&mut ball, &mut teams(), &[], &field, &settings);
        assert_eq!(out.hits, vec![Hit::Wall, Hit::Wall]);
        assert!((ball.vel - Vec2::new(-8.0, 8.0)).length() < 1e-4);
        assert!((out.consumed - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_paddle_bounce_in_resolver() {
        let field = near_wall_field();
        let settings = loose_settings();
        let paddle = Paddle::from_spec(
            0,
            0,
            &PaddleSpec {
                x: 30.0,
                y: 50.0,
                angle: 0.0,
                cf: 1.0,
                cs: 1.0,
            },
        );
        // Paddle right face at x = 36; hit dead center
        let mut ball = Ball::new(Vec2::new(40.0, 50.0), Vec2::new(-8.0, 0.0));
        let out = resolve(&mut ball, &mut teams(), &[paddle], &field, &settings);
        assert_eq!(out.hits, vec![Hit::Paddle(0)]);
        assert!((ball.vel - Vec2::new(8.0, 0.0)).length() < 1e-3);
        assert!((ball.pos - Vec2::new(40.0, 50.0)).length() < 1e-2);
    }

    #[test]
    fn test_ball_inside_paddle_leaves_freely() {
        let field = near_wall_field();
        let settings = Settings::default();
        let paddle = Paddle::from_spec(
            0,
            0,
            &PaddleSpec {
                x: 30.0,
                y: 50.0,
                angle: 0.0,
                cf: 1.0,
                cs: 1.0,
            },
        );
        let mut ball = Ball::new(Vec2::new(31.0, 50.0), Vec2::new(2.0, 0.0));
        let out = resolve(&mut ball, &mut teams(), &[paddle], &field, &settings);
        assert!(out.hits.is_empty());
        assert_eq!(ball.pos, Vec2::new(33.0, 50.0));
    }

    #[test]
    fn test_tie_break_takes_first_segment() {
        let a = CollisionLine::new(Vec2::new(5.0, -1.0), Vec2::new(5.0, 1.0), SegmentKind::Wall);
        let b = CollisionLine::new(Vec2::new(5.0, -2.0), Vec2::new(5.0, 2.0), SegmentKind::Goal(0));
        let hit = earliest_hit(Vec2::ZERO, Vec2::new(10.0, 0.0), &[a, b], 1.0, &[]).unwrap();
        assert_eq!(hit.index, 0);
        let hit = earliest_hit(Vec2::ZERO, Vec2::new(10.0, 0.0), &[b, a], 1.0, &[]).unwrap();
        assert_eq!(hit.index, 0);
        assert_eq!(hit.segment.kind, SegmentKind::Goal(0));
    }

    #[test]
    fn test_out_of_reach_is_no_hit() {
        let wall = CollisionLine::new(Vec2::new(5.0, -1.0), Vec2::new(5.0, 1.0), SegmentKind::Wall);
        assert!(earliest_hit(Vec2::ZERO, Vec2::new(4.0, 0.0), &[wall], 1.0, &[]).is_none());
        // Behind the ball
        assert!(earliest_hit(Vec2::ZERO, Vec2::new(-10.0, 0.0), &[wall], 1.0, &[]).is_none());
        // Parallel
        assert!(earliest_hit(Vec2::ZERO, Vec2::new(0.0, 10.0), &[wall], 1.0, &[]).is_none());
        // Misses the segment extent
        assert!(earliest_hit(Vec2::new(0.0, 3.0), Vec2::new(10.0, 0.0), &[wall], 1.0, &[]).is_none());
    }

    #[test]
    fn test_recover_escaped_ball() {
        let field = boxed_field();
        let settings = Settings::default();
        let mut ball = Ball::new(Vec2::new(500.0, 50.0), Vec2::new(1.0, 0.0));
        assert!(recover_if_escaped(&mut ball, &field, &settings));
        assert_eq!(ball.pos, field.center());
        // Escaped along +x, recovered along the tangent
        assert!((ball.vel - Vec2::new(0.0, settings.recovery_speed)).length() < 1e-5);

        let mut ball = Ball::new(Vec2::new(50.0, 50.0), Vec2::new(1.0, 0.0));
        assert!(!recover_if_escaped(&mut ball, &field, &settings));

        let mut ball = Ball::new(Vec2::new(f32::NAN, 50.0), Vec2::new(1.0, 0.0));
        assert!(recover_if_escaped(&mut ball, &field, &settings));
        assert!(ball.pos.is_finite());
    }

    proptest! {
        #[test]
        fn prop_budget_is_one_step(
            x in 5.0f32..95.0, y in 5.0f32..95.0,
            vx in -30.0f32..30.0, vy in -30.0f32..30.0,
        ) {
            let field = boxed_field();
            let settings = loose_settings();
            let mut ball = Ball::new(Vec2::new(x, y), Vec2::new(vx, vy));
            let out = resolve(&mut ball, &mut teams(), &[], &field, &settings);
            prop_assert!((out.consumed - 1.0).abs() < 1e-4);
            prop_assert!(out.consumed <= 1.0 + 1e-4);
        }

        #[test]
        fn prop_ball_stays_inside_walls(
            x in 5.0f32..95.0, y in 5.0f32..95.0,
            vx in -30.0f32..30.0, vy in -30.0f32..30.0,
        ) {
            let field = boxed_field();
            let settings = loose_settings();
            let mut teams = teams();
            let mut ball = Ball::new(Vec2::new(x, y), Vec2::new(vx, vy));
            for _ in 0..50 {
                resolve(&mut ball, &mut teams, &[], &field, &settings);
                prop_assert!(ball.pos.x <= 100.0 + 1e-3, "escaped right: {:?}", ball.pos);
                prop_assert!(ball.pos.y >= -1e-3 && ball.pos.y <= 100.0 + 1e-3, "escaped: {:?}", ball.pos);
            }
        }

        #[test]
        fn prop_speed_never_exceeds_cap_after_bounce(
            y in 10.0f32..90.0,
            vx in 1.0f32..20.0, vy in -5.0f32..5.0,
        ) {
            let field = near_wall_field();
            let settings = Settings { max_ball_speed: 3.0, ..Settings::default() };
            let paddle = Paddle::from_spec(0, 0, &PaddleSpec { x: 54.0, y, angle: 0.3, cf: 2.0, cs: 3.0 });
            let mut ball = Ball::new(Vec2::new(40.0, y), Vec2::new(vx, vy));
            let out = resolve(&mut ball, &mut teams(), &[paddle], &field, &settings);
            if !out.hits.is_empty() {
                prop_assert!(ball.speed() <= settings.max_ball_speed + 1e-4);
            }
        }
    }
}
