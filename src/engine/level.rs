// In-memory level representation handed to the server at match start, plus
// the JSON loader used by the headless runner. Parsing happens before any
// game state exists; validation failures reject the level.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::geom::{Point, Rect};

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("level parse error: {0}")]
    Parse(String),
    #[error("teleporter {0} has no destinations")]
    TeleporterWithoutDestination(usize),
    #[error("barrier {0} has fewer than 3 vertices")]
    DegenerateBarrier(usize),
    #[error("bot {0} references team {1} which does not exist")]
    UnknownTeam(usize, i32),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BarrierSpec {
    pub points: Vec<Point>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeleporterSpec {
    pub entry: Point,
    pub destinations: Vec<Point>,
    #[serde(default)]
    pub delay_ms: Option<u32>,
    #[serde(default)]
    pub cooldown_ms: Option<u32>,
    #[serde(default)]
    pub engineered: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamSpec {
    pub spawn_points: Vec<Point>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotSpec {
    pub team: i32,
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadoutZoneSpec {
    pub team: i32,
    pub points: Vec<Point>,
}

/// Everything the core needs to know about a level. Parsing and the editor
/// live elsewhere; this is the already-parsed form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelSpec {
    pub world_bounds: Rect,
    #[serde(default)]
    pub barriers: Vec<BarrierSpec>,
    #[serde(default)]
    pub teleporters: Vec<TeleporterSpec>,
    #[serde(default)]
    pub teams: Vec<TeamSpec>,
    #[serde(default)]
    pub bots: Vec<BotSpec>,
    #[serde(default)]
    pub loadout_zones: Vec<LoadoutZoneSpec>,
}

impl LevelSpec {
    /// An empty level over the given bounds; used as a base by tests and
    /// generated content.
    pub fn new(world_bounds: Rect) -> Self {
        LevelSpec {
            world_bounds,
            barriers: Vec::new(),
            teleporters: Vec::new(),
            teams: Vec::new(),
            bots: Vec::new(),
            loadout_zones: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, LevelError> {
        let level: LevelSpec =
            serde_json::from_str(json).map_err(|e| LevelError::Parse(e.to_string()))?;
        level.validate()?;
        Ok(level)
    }

    pub fn validate(&self) -> Result<(), LevelError> {
        for (i, b) in self.barriers.iter().enumerate() {
            if b.points.len() < 3 {
                return Err(LevelError::DegenerateBarrier(i));
            }
        }
        for (i, t) in self.teleporters.iter().enumerate() {
            if t.destinations.is_empty() {
                return Err(LevelError::TeleporterWithoutDestination(i));
            }
        }
        for (i, b) in self.bots.iter().enumerate() {
            if b.team >= 0 && b.team as usize >= self.teams.len() {
                return Err(LevelError::UnknownTeam(i, b.team));
            }
        }
        Ok(())
    }

    /// All spawn points of one team.
    pub fn spawn_points(&self, team: i32) -> &[Point] {
        usize::try_from(team)
            .ok()
            .and_then(|t| self.teams.get(t))
            .map(|t| t.spawn_points.as_slice())
            .unwrap_or(&[])
    }
}

/// Convenience for building axis-aligned barriers in code.
pub fn rect_barrier(x1: f32, y1: f32, x2: f32, y2: f32) -> BarrierSpec {
    BarrierSpec {
        points: vec![
            Point::new(x1, y1),
            Point::new(x2, y1),
            Point::new(x2, y2),
            Point::new(x1, y2),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_minimal() {
        let json = r#"{
            "world_bounds": {"min": {"x": 0, "y": 0}, "max": {"x": 1000, "y": 1000}},
            "barriers": [{"points": [{"x": 400, "y": 0}, {"x": 600, "y": 0}, {"x": 600, "y": 500}, {"x": 400, "y": 500}]}],
            "teams": [{"spawn_points": [{"x": 100, "y": 100}]}]
        }"#;
        let level = LevelSpec::from_json(json).unwrap();
        assert_eq!(level.world_bounds.max, Point::new(1000.0, 1000.0));
        assert_eq!(level.barriers.len(), 1);
        assert_eq!(level.teams.len(), 1);
        assert!(level.teleporters.is_empty());
        assert_eq!(level.spawn_points(0), &[Point::new(100.0, 100.0)]);
        assert!(level.spawn_points(3).is_empty());
        assert!(level.spawn_points(-1).is_empty());
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            LevelSpec::from_json("not json"),
            Err(LevelError::Parse(_))
        ));
    }

    #[test]
    fn test_teleporter_without_destination_rejected() {
        let json = r#"{
            "world_bounds": {"min": {"x": 0, "y": 0}, "max": {"x": 100, "y": 100}},
            "teleporters": [{"entry": {"x": 10, "y": 10}, "destinations": []}]
        }"#;
        assert!(matches!(
            LevelSpec::from_json(json),
            Err(LevelError::TeleporterWithoutDestination(0))
        ));
    }

    #[test]
    fn test_degenerate_barrier_rejected() {
        let mut level = LevelSpec::new(Rect::new(Point::new(0.0, 0.0), Point::new(100.0, 100.0)));
        level.barriers.push(BarrierSpec {
            points: vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)],
        });
        assert!(matches!(level.validate(), Err(LevelError::DegenerateBarrier(0))));
    }

    #[test]
    fn test_bot_with_unknown_team_rejected() {
        let mut level = LevelSpec::new(Rect::new(Point::new(0.0, 0.0), Point::new(100.0, 100.0)));
        level.bots.push(BotSpec {
            team: 2,
            script: "b.lua".into(),
            args: vec![],
        });
        assert!(matches!(level.validate(), Err(LevelError::UnknownTeam(0, 2))));
    }
}
