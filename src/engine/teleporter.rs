// Teleporter runtime. Each teleporter is a small state machine driven once
// per tick; while triggered it relocates every ship standing on the pad.
// Engineered teleporters carry hit points and can be destroyed.

use std::collections::HashMap;

use rand::Rng;

use super::config::*;
use super::geom::{Point, Rect};
use super::level::{LevelError, TeleporterSpec};
use super::ship::Ship;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TeleporterState {
    Idle,
    /// Actively relocating ships; the window lasts `delay_ms`.
    Triggered { remaining: u32 },
    /// Re-arm delay after a trigger window.
    Cooldown { remaining: u32 },
    Exploding { remaining: u32 },
    Dead,
}

/// One ship relocation performed during a tick.
#[derive(Clone, Copy, Debug)]
pub struct TeleportHop {
    pub ship_id: u32,
    pub dest: Point,
}

pub struct Teleporter {
    pub id: u32,
    pub entry: Point,
    pub destinations: Vec<Point>,
    pub delay_ms: u32,
    pub cooldown_ms: u32,
    pub engineered: bool,
    pub health: f32,
    pub state: TeleporterState,
}

impl Teleporter {
    pub fn from_spec(id: u32, index: usize, spec: &TeleporterSpec) -> Result<Self, LevelError> {
        if spec.destinations.is_empty() {
            return Err(LevelError::TeleporterWithoutDestination(index));
        }
        Ok(Teleporter {
            id,
            entry: spec.entry,
            destinations: spec.destinations.clone(),
            delay_ms: spec.delay_ms.unwrap_or(TELEPORTER_DEFAULT_DELAY_MS),
            cooldown_ms: spec.cooldown_ms.unwrap_or(TELEPORTER_DEFAULT_COOLDOWN_MS),
            engineered: spec.engineered,
            health: 1.0,
            state: TeleporterState::Idle,
        })
    }

    pub fn extent(&self) -> Rect {
        Rect::around(self.entry, TELEPORTER_RADIUS)
    }

    pub fn exploded(&self) -> bool {
        matches!(
            self.state,
            TeleporterState::Exploding { .. } | TeleporterState::Dead
        )
    }

    /// Fully burned out and ready to be detached from the world.
    pub fn is_dead(&self) -> bool {
        self.state == TeleporterState::Dead
    }

    /// Only engineered teleporters block projectiles.
    pub fn collides_with_projectile(&self) -> bool {
        self.engineered && !self.exploded()
    }

    /// Damage is accepted only for engineered teleporters. Returns true when
    /// this hit destroyed it.
    pub fn damage(&mut self, amount: f32) -> bool {
        if !self.engineered || self.exploded() {
            return false;
        }
        self.health -= amount;
        if self.health <= 0.0 {
            self.health = 0.0;
            self.state = TeleporterState::Exploding {
                remaining: TELEPORTER_EXPLOSION_MS,
            };
            return true;
        }
        false
    }

    /// Per-tick drive. Relocates ships while triggered and returns the hops
    /// performed so the caller can run landing checks and effects.
    pub fn idle<R: Rng>(
        &mut self,
        dt: u32,
        ships: &mut HashMap<u32, Ship>,
        rng: &mut R,
    ) -> Vec<TeleportHop> {
        match self.state {
            TeleporterState::Dead => Vec::new(),
            TeleporterState::Exploding { remaining } => {
                let left = remaining.saturating_sub(dt);
                self.state = if left == 0 {
                    TeleporterState::Dead
                } else {
                    TeleporterState::Exploding { remaining: left }
                };
                Vec::new()
            }
            TeleporterState::Cooldown { remaining } => {
                let left = remaining.saturating_sub(dt);
                self.state = if left == 0 {
                    TeleporterState::Idle
                } else {
                    TeleporterState::Cooldown { remaining: left }
                };
                Vec::new()
            }
            TeleporterState::Idle => {
                let triggered = ships.values().any(|s| {
                    !s.exploded
                        && self.entry.distance_to(s.pos) < TELEPORTER_TRIGGER_RADIUS
                });
                if !triggered {
                    return Vec::new();
                }
                self.state = TeleporterState::Triggered {
                    remaining: self.delay_ms,
                };
                self.relocate(ships, rng)
            }
            TeleporterState::Triggered { remaining } => {
                let hops = self.relocate(ships, rng);
                let left = remaining.saturating_sub(dt);
                self.state = if left == 0 {
                    if self.cooldown_ms == 0 {
                        TeleporterState::Idle
                    } else {
                        TeleporterState::Cooldown {
                            remaining: self.cooldown_ms,
                        }
                    }
                } else {
                    TeleporterState::Triggered { remaining: left }
                };
                hops
            }
        }
    }

    fn relocate<R: Rng>(&self, ships: &mut HashMap<u32, Ship>, rng: &mut R) -> Vec<TeleportHop> {
        let mut hops = Vec::new();
        for ship in ships.values_mut() {
            if ship.exploded {
                continue;
            }
            if self.entry.distance_to(ship.pos) >= TELEPORTER_RADIUS + ship.radius {
                continue;
            }
            let dest = self.destinations[rng.gen_range(0..self.destinations.len())];
            // Translate rather than snap so a ship entering off-center exits
            // off-center the same way.
            ship.pos = ship.pos - self.entry + dest;
            ship.current_zone = None;
            ship.flight_plan.clear();
            ship.flight_plan_to = None;
            hops.push(TeleportHop {
                ship_id: ship.id,
                dest,
            });
        }
        hops
    }
}
