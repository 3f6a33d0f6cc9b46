//! Vector and segment geometry
//!
//! Pure helpers on top of `glam::Vec2`: ray/segment intersection, convex
//! hull containment, reflection and the spin-aware paddle bounce.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which two directions count as parallel
const PARALLEL_EPSILON: f32 = 1e-9;
/// Smallest angle between an outgoing paddle bounce and the face
const MIN_EXIT_ANGLE: f32 = 0.1;

/// A plain line segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub p0: Vec2,
    pub p1: Vec2,
}

impl Line {
    pub fn new(p0: Vec2, p1: Vec2) -> Self {
        Self { p0, p1 }
    }

    /// Direction vector from `p0` to `p1` (not normalized)
    #[inline]
    pub fn direction(&self) -> Vec2 {
        self.p1 - self.p0
    }

    /// Point at parameter `t` (0 = p0, 1 = p1)
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec2 {
        self.p0 + self.direction() * t
    }

    /// Unit normal on the left of p0 → p1 (zero for degenerate segments)
    pub fn normal(&self) -> Vec2 {
        normalize_or(tangent(self.direction()), Vec2::ZERO)
    }
}

/// Normalize `v`, falling back to `fallback` for (near) zero vectors
#[inline]
pub fn normalize_or(v: Vec2, fallback: Vec2) -> Vec2 {
    let len_sq = v.length_squared();
    if len_sq <= f32::EPSILON * f32::EPSILON || !len_sq.is_finite() {
        fallback
    } else {
        v / len_sq.sqrt()
    }
}

/// Perpendicular vector rotated +90°
#[inline]
pub fn tangent(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}

/// Standard reflection: v' = v - 2(v·n̂)n̂
///
/// A zero normal leaves the velocity untouched.
#[inline]
pub fn reflect(velocity: Vec2, normal: Vec2) -> Vec2 {
    let n = normalize_or(normal, Vec2::ZERO);
    velocity - 2.0 * velocity.dot(n) * n
}

/// Rotate `v` by `angle` radians
#[inline]
pub fn rotate(v: Vec2, angle: f32) -> Vec2 {
    Vec2::from_angle(angle).rotate(v)
}

/// Solve `p0 + t0 * d0 = q0 + t1 * d1`
///
/// Returns `None` when the directions are parallel; callers treat that as
/// "no collision".
pub fn intersection(p0: Vec2, d0: Vec2, q0: Vec2, d1: Vec2) -> Option<(f32, f32)> {
    let det = d0.perp_dot(d1);
    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let delta = q0 - p0;
    let t0 = delta.perp_dot(d1) / det;
    let t1 = delta.perp_dot(d0) / det;
    Some((t0, t1))
}

/// Point-in-convex-polygon test
///
/// `lines` must be the polygon edges in winding order (either direction).
/// With `inclusive`, points on an edge count as inside.
pub fn is_in_convex_hull(point: Vec2, lines: &[Line], inclusive: bool) -> bool {
    if lines.is_empty() {
        return false;
    }
    let mut sign = 0.0_f32;
    for line in lines {
        let cross = line.direction().perp_dot(point - line.p0);
        if cross == 0.0 {
            if !inclusive {
                return false;
            }
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Close an ordered vertex list into hull edges
pub fn polygon_lines(vertices: &[Vec2]) -> Vec<Line> {
    if vertices.len() < 2 {
        return Vec::new();
    }
    vertices
        .iter()
        .zip(vertices.iter().cycle().skip(1))
        .map(|(a, b)| Line::new(*a, *b))
        .collect()
}

/// Outgoing velocity for a ball striking a paddle face
///
/// `hit_t` is the impact parameter along `line` (0..1). The ball leaves
/// along the face normal on its incoming side, rotated by the offset from
/// the face center (-1 at p0, +1 at p1) times `max_angle * cf`, with speed
/// scaled by `cs`. The deflection stays short of parallel to the face.
pub fn paddle_bounce(
    line: &Line,
    hit_t: f32,
    velocity: Vec2,
    cf: f32,
    cs: f32,
    max_angle: f32,
) -> Vec2 {
    let speed = velocity.length();
    // Normal on the side the ball came from
    let normal = line.normal();
    let normal = if velocity.dot(normal) > 0.0 { -normal } else { normal };
    if normal == Vec2::ZERO {
        return -velocity;
    }

    let offset = (hit_t.clamp(0.0, 1.0) * 2.0 - 1.0).clamp(-1.0, 1.0);
    // Rotate toward p1 for positive offsets regardless of which side was hit
    let toward_p1 = tangent(normal).dot(line.direction()).signum();
    // Past a right angle the ball would turn back into the paddle
    let limit = std::f32::consts::FRAC_PI_2 - MIN_EXIT_ANGLE;
    let angle = (offset * max_angle * cf).clamp(-limit, limit) * toward_p1;

    rotate(normal, angle) * speed * cs
}
