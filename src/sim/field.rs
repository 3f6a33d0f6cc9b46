//! Static level geometry
//!
//! A field is loaded once per match from a level descriptor keyed by player
//! count. Segment names are parsed into [`SegmentKind`] here so the
//! collision loop never looks at strings.

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::geometry::{Line, is_in_convex_hull, polygon_lines};
use crate::error::{Error, Result};

/// What a collision segment does to the ball
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Reflect about the segment normal
    Wall,
    /// Score for/against the given team and re-serve
    Goal(usize),
    /// Spin-aware bounce off the given paddle
    PaddleEdge(usize),
}

impl SegmentKind {
    /// Parse a symbolic segment name (`goal<N>`, `paddle<N>`, anything else is a wall)
    pub fn from_name(name: &str) -> Result<Self> {
        let index = |rest: &str| {
            rest.parse::<usize>()
                .map_err(|_| Error::SegmentName(name.to_string()))
        };
        if let Some(rest) = name.strip_prefix("goal") {
            index(rest).map(SegmentKind::Goal)
        } else if let Some(rest) = name.strip_prefix("paddle") {
            index(rest).map(SegmentKind::PaddleEdge)
        } else {
            Ok(SegmentKind::Wall)
        }
    }
}

/// A segment the ball can hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionLine {
    pub line: Line,
    pub kind: SegmentKind,
}

impl CollisionLine {
    pub fn new(p0: Vec2, p1: Vec2, kind: SegmentKind) -> Self {
        Self {
            line: Line::new(p0, p1),
            kind,
        }
    }
}

/// Paddle placement in a level descriptor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddleSpec {
    pub x: f32,
    pub y: f32,
    /// Initial rotation (radians)
    pub angle: f32,
    /// Spin factor applied to off-center hits
    pub cf: f32,
    /// Speed factor applied on every paddle hit
    pub cs: f32,
}

/// Named segment as it appears in a level descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub name: String,
    pub p0: Vec2,
    pub p1: Vec2,
}

/// External level description (JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDescriptor {
    pub players: usize,
    pub paddles: Vec<PaddleSpec>,
    pub collisions: Vec<SegmentSpec>,
    pub width: f32,
    pub height: f32,
    /// Per-paddle movement polygons; missing means the whole field
    #[serde(default)]
    pub areas: Vec<Vec<Vec2>>,
}

const LEVEL_2P: &str = include_str!("../../levels/2p.json");
const LEVEL_4P: &str = include_str!("../../levels/4p.json");

/// Immutable per-match geometry
#[derive(Debug, Clone)]
pub struct Field {
    pub players: usize,
    pub width: f32,
    pub height: f32,
    pub paddles: Vec<PaddleSpec>,
    segments: Vec<CollisionLine>,
    areas: Vec<Vec<Line>>,
}

impl Field {
    /// Built-in level for the given player count
    pub fn builtin(players: usize) -> Result<Self> {
        match players {
            2 => Self::from_json(LEVEL_2P),
            4 => Self::from_json(LEVEL_4P),
            n => Err(Error::UnknownLevel(n)),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let desc: LevelDescriptor = serde_json::from_str(json).map_err(Error::LevelParse)?;
        Self::from_descriptor(desc)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_descriptor(desc: LevelDescriptor) -> Result<Self> {
        if desc.players < 2 {
            return Err(Error::InvalidLevel(format!(
                "need at least 2 players, got {}",
                desc.players
            )));
        }
        if !(desc.width > 0.0 && desc.height > 0.0) {
            return Err(Error::InvalidLevel(format!(
                "bad dimensions {}x{}",
                desc.width, desc.height
            )));
        }
        if desc.paddles.is_empty() {
            return Err(Error::InvalidLevel("no paddles".into()));
        }

        let mut segments = Vec::with_capacity(desc.collisions.len());
        for spec in &desc.collisions {
            let kind = SegmentKind::from_name(&spec.name)?;
            match kind {
                SegmentKind::Goal(team) if team >= desc.players => {
                    return Err(Error::InvalidLevel(format!(
                        "{} refers to team {team} of {}",
                        spec.name, desc.players
                    )));
                }
                // Paddle edges follow the paddles at runtime
                SegmentKind::PaddleEdge(_) => {
                    return Err(Error::InvalidLevel(format!(
                        "static segment {} uses a paddle name",
                        spec.name
                    )));
                }
                _ => {}
            }
            segments.push(CollisionLine::new(spec.p0, spec.p1, kind));
        }

        let areas = if desc.areas.is_empty() {
            let bounds = [
                Vec2::ZERO,
                Vec2::new(desc.width, 0.0),
                Vec2::new(desc.width, desc.height),
                Vec2::new(0.0, desc.height),
            ];
            vec![polygon_lines(&bounds); desc.paddles.len()]
        } else if desc.areas.len() == desc.paddles.len() {
            let mut areas = Vec::with_capacity(desc.areas.len());
            for (i, poly) in desc.areas.iter().enumerate() {
                if poly.len() < 3 {
                    return Err(Error::InvalidLevel(format!(
                        "area {i} has {} vertices",
                        poly.len()
                    )));
                }
                areas.push(polygon_lines(poly));
            }
            areas
        } else {
            return Err(Error::InvalidLevel(format!(
                "{} areas for {} paddles",
                desc.areas.len(),
                desc.paddles.len()
            )));
        };

        log::info!(
            "Loaded {}-player field {}x{} ({} segments, {} paddles)",
            desc.players,
            desc.width,
            desc.height,
            segments.len(),
            desc.paddles.len()
        );

        Ok(Self {
            players: desc.players,
            width: desc.width,
            height: desc.height,
            paddles: desc.paddles,
            segments,
            areas,
        })
    }

    /// Static segments in descriptor order
    pub fn segments(&self) -> &[CollisionLine] {
        &self.segments
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width / 2.0, self.height / 2.0)
    }

    /// Whether `pos` lies within the field expanded by `margin`
    pub fn contains(&self, pos: Vec2, margin: f32) -> bool {
        pos.is_finite()
            && pos.x >= -margin
            && pos.y >= -margin
            && pos.x <= self.width + margin
            && pos.y <= self.height + margin
    }

    /// Whether a paddle may sit at `pos`
    pub fn area_contains(&self, paddle: usize, pos: Vec2) -> bool {
        self.areas
            .get(paddle)
            .is_some_and(|area| is_in_convex_hull(pos, area, true))
    }
}
