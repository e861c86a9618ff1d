// Ship state shared by players and bots: position, health/energy, loadout,
// per-tick queued move, and the bot-side navigation scratch (current zone and
// cached flight plan). Mutation happens only on the game thread.

use serde::Serialize;

use super::config::*;
use super::events::EventSet;
use super::geom::{Point, Rect};

/// The 2 modules + 3 weapons a ship is configured with.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Loadout {
    pub modules: [u8; SHIP_MODULE_COUNT],
    pub weapons: [u8; SHIP_WEAPON_COUNT],
}

impl Default for Loadout {
    fn default() -> Self {
        Loadout {
            modules: [MODULE_BOOST, MODULE_SHIELD],
            weapons: [WEAPON_PHASER, WEAPON_BOUNCE, WEAPON_TRIPLE],
        }
    }
}

impl Loadout {
    /// Build from the 5-slot script representation (2 modules, 3 weapons).
    pub fn from_items(items: [u8; SHIP_MODULE_COUNT + SHIP_WEAPON_COUNT]) -> Option<Loadout> {
        let modules = [items[0], items[1]];
        let weapons = [items[2], items[3], items[4]];
        if modules.iter().any(|&m| m as usize >= MODULE_COUNT) {
            return None;
        }
        if weapons.iter().any(|&w| w as usize >= WEAPON_COUNT) {
            return None;
        }
        Some(Loadout { modules, weapons })
    }

    pub fn items(&self) -> [u8; SHIP_MODULE_COUNT + SHIP_WEAPON_COUNT] {
        [
            self.modules[0],
            self.modules[1],
            self.weapons[0],
            self.weapons[1],
            self.weapons[2],
        ]
    }
}

/// Per-tick control input. Axis values are fractions of the ship's speed in
/// [0, 1]; `time_ms` is the tick delta the move was built for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Move {
    pub up: f32,
    pub down: f32,
    pub left: f32,
    pub right: f32,
    pub angle: f32,
    pub fire: bool,
    pub modules: [bool; SHIP_MODULE_COUNT],
    pub time_ms: u32,
}

impl Move {
    /// A move with all axes zeroed, keeping the current facing.
    pub fn cleared(angle: f32, time_ms: u32) -> Move {
        Move {
            up: 0.0,
            down: 0.0,
            left: 0.0,
            right: 0.0,
            angle,
            fire: false,
            modules: [false; SHIP_MODULE_COUNT],
            time_ms,
        }
    }

    /// Decompose a velocity along `angle` into the four axis components, the
    /// way the wire move format carries thrust.
    pub fn set_thrust(&mut self, vel: f32, angle: f32) {
        let s = angle.sin();
        let c = angle.cos();
        self.up = if s <= 0.0 { -vel * s } else { 0.0 };
        self.down = if s > 0.0 { vel * s } else { 0.0 };
        self.right = if c >= 0.0 { vel * c } else { 0.0 };
        self.left = if c < 0.0 { -vel * c } else { 0.0 };
    }

    /// Net displacement for this move over its tick, with each axis capped
    /// at the ship maximum.
    pub fn displacement(&self) -> Point {
        let cap = SHIP_MAX_SPEED;
        let dx = self.right.clamp(0.0, cap) - self.left.clamp(0.0, cap);
        let dy = self.down.clamp(0.0, cap) - self.up.clamp(0.0, cap);
        Point::new(dx, dy) * self.time_ms as f32
    }
}

pub struct Ship {
    pub id: u32,
    pub name: String,
    pub team: i32,
    pub pos: Point,
    pub vel: Point,
    pub angle: f32,
    pub radius: f32,
    pub health: f32,
    pub energy: f32,
    pub exploded: bool,
    pub loadout: Loadout,
    pub req_loadout: Option<Loadout>,
    /// Slot index into `loadout.weapons`.
    pub active_weapon: usize,
    pub modules_active: [bool; SHIP_MODULE_COUNT],
    /// Mounted items (flags carried).
    pub flags: u32,
    pub is_robot: bool,

    // Bot navigation scratch.
    pub current_zone: Option<u16>,
    pub flight_plan: Vec<Point>,
    pub flight_plan_to: Option<u16>,
    pub pending_move: Move,
    pub respawn_remaining: u32,
    pub last_fire_time: i64,
    pub subscriptions: EventSet,
}

impl Ship {
    pub fn new(id: u32, name: &str, team: i32, pos: Point) -> Ship {
        Ship {
            id,
            name: name.to_string(),
            team,
            pos,
            vel: Point::default(),
            angle: 0.0,
            radius: SHIP_RADIUS,
            health: SHIP_MAX_HEALTH,
            energy: SHIP_MAX_ENERGY,
            exploded: false,
            loadout: Loadout::default(),
            req_loadout: None,
            active_weapon: 0,
            modules_active: [false; SHIP_MODULE_COUNT],
            flags: 0,
            is_robot: false,
            current_zone: None,
            flight_plan: Vec::new(),
            flight_plan_to: None,
            pending_move: Move::cleared(0.0, 0),
            respawn_remaining: 0,
            last_fire_time: i64::MIN / 2,
            subscriptions: EventSet::empty(),
        }
    }

    pub fn extent(&self) -> Rect {
        Rect::around(self.pos, self.radius)
    }

    pub fn angle_to_pt(&self, p: Point) -> f32 {
        self.pos.angle_to(p)
    }

    pub fn module_slot(&self, module: u8) -> Option<usize> {
        self.loadout.modules.iter().position(|&m| m == module)
    }

    pub fn weapon_slot(&self, weapon: u8) -> Option<usize> {
        self.loadout.weapons.iter().position(|&w| w == weapon)
    }

    pub fn selected_weapon(&self) -> u8 {
        self.loadout.weapons[self.active_weapon]
    }

    pub fn is_module_active(&self, module: u8) -> bool {
        self.module_slot(module)
            .map(|i| self.modules_active[i])
            .unwrap_or(false)
    }

    /// Cloaked ships with nothing mounted are invisible to queries and to
    /// the lead-shot solver.
    pub fn is_hidden(&self) -> bool {
        self.is_module_active(MODULE_CLOAK) && self.flags == 0
    }

    /// Apply damage, honoring shield and armor. Returns true when the ship
    /// just died.
    pub fn apply_damage(&mut self, amount: f32) -> bool {
        if self.exploded {
            return false;
        }
        if self.is_module_active(MODULE_SHIELD) {
            return false;
        }
        let amount = if self.is_module_active(MODULE_ARMOR) {
            amount * 0.5
        } else {
            amount
        };
        self.health -= amount;
        if self.health <= 0.0 {
            self.kill();
            return true;
        }
        false
    }

    pub fn kill(&mut self) {
        self.exploded = true;
        self.health = 0.0;
        self.vel = Point::default();
        self.respawn_remaining = ROBOT_RESPAWN_DELAY_MS;
        self.flags = 0;
        self.flight_plan.clear();
        self.flight_plan_to = None;
    }

    /// Reset to factory state at a spawn point. The requested loadout, if
    /// any, is granted on spawn.
    pub fn spawn_at(&mut self, pos: Point) {
        self.pos = pos;
        self.vel = Point::default();
        self.health = SHIP_MAX_HEALTH;
        self.energy = SHIP_MAX_ENERGY;
        self.exploded = false;
        self.modules_active = [false; SHIP_MODULE_COUNT];
        self.current_zone = None;
        self.flight_plan.clear();
        self.flight_plan_to = None;
        self.respawn_remaining = 0;
        self.apply_requested_loadout();
    }

    pub fn apply_requested_loadout(&mut self) {
        if let Some(req) = self.req_loadout.take() {
            self.loadout = req;
            self.active_weapon = 0;
        }
    }
}

/// A fired shot in flight. Mines and spy bugs are stationary projectiles
/// with long lifetimes.
#[derive(Clone, Debug)]
pub struct Projectile {
    pub id: u32,
    pub owner: u32,
    pub team: i32,
    pub weapon: u8,
    pub pos: Point,
    pub vel: Point,
    pub life_remaining_ms: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_loadout_slots() {
        let ship = Ship::new(1, "s", 0, Point::new(0.0, 0.0));
        assert_eq!(ship.selected_weapon(), WEAPON_PHASER);
        assert_eq!(ship.weapon_slot(WEAPON_BOUNCE), Some(1));
        assert_eq!(ship.weapon_slot(WEAPON_MINE), None);
        assert_eq!(ship.module_slot(MODULE_SHIELD), Some(1));
        assert_eq!(ship.module_slot(MODULE_CLOAK), None);
    }

    #[test]
    fn test_loadout_from_items_validates() {
        assert!(Loadout::from_items([MODULE_CLOAK, MODULE_ARMOR, 0, 1, 2]).is_some());
        assert!(Loadout::from_items([MODULE_COUNT as u8, 0, 0, 1, 2]).is_none());
        assert!(Loadout::from_items([0, 1, WEAPON_COUNT as u8, 1, 2]).is_none());
        let l = Loadout::from_items([MODULE_CLOAK, MODULE_SENSOR, 2, 1, 0]).unwrap();
        assert_eq!(l.items(), [MODULE_CLOAK, MODULE_SENSOR, 2, 1, 0]);
    }

    #[test]
    fn test_move_thrust_decomposition() {
        let mut m = Move::cleared(0.0, 32);
        m.set_thrust(1.0, 0.0);
        assert!((m.right - 1.0).abs() < 1e-6);
        assert_eq!(m.left, 0.0);

        m.set_thrust(1.0, std::f32::consts::PI);
        assert!((m.left - 1.0).abs() < 1e-6);
        assert!(m.right.abs() < 1e-5);

        m.set_thrust(1.0, std::f32::consts::FRAC_PI_2);
        assert!((m.down - 1.0).abs() < 1e-6);
        assert!(m.up.abs() < 1e-6);
    }

    #[test]
    fn test_move_displacement_caps_speed() {
        let mut m = Move::cleared(0.0, 100);
        m.set_thrust(50.0, 0.0); // far beyond the cap
        let d = m.displacement();
        assert!((d.x - SHIP_MAX_SPEED * 100.0).abs() < 1e-4);
        assert_eq!(d.y, 0.0);
    }

    #[test]
    fn test_damage_and_death() {
        let mut ship = Ship::new(1, "s", 0, Point::new(0.0, 0.0));
        assert!(!ship.apply_damage(0.4));
        assert!((ship.health - 0.6).abs() < 1e-6);
        assert!(ship.apply_damage(0.7));
        assert!(ship.exploded);
        assert_eq!(ship.respawn_remaining, ROBOT_RESPAWN_DELAY_MS);
        // Dead ships take no further damage.
        assert!(!ship.apply_damage(1.0));
    }

    #[test]
    fn test_shield_blocks_damage() {
        let mut ship = Ship::new(1, "s", 0, Point::new(0.0, 0.0));
        let slot = ship.module_slot(MODULE_SHIELD).unwrap();
        ship.modules_active[slot] = true;
        assert!(!ship.apply_damage(0.9));
        assert_eq!(ship.health, SHIP_MAX_HEALTH);
    }

    #[test]
    fn test_spawn_applies_requested_loadout() {
        let mut ship = Ship::new(1, "s", 0, Point::new(0.0, 0.0));
        ship.req_loadout = Loadout::from_items([MODULE_CLOAK, MODULE_SHIELD, 2, 1, 0]);
        ship.kill();
        ship.spawn_at(Point::new(10.0, 10.0));
        assert!(!ship.exploded);
        assert_eq!(ship.health, SHIP_MAX_HEALTH);
        assert_eq!(ship.loadout.modules[0], MODULE_CLOAK);
        assert!(ship.req_loadout.is_none());
        assert_eq!(ship.pos, Point::new(10.0, 10.0));
    }

    #[test]
    fn test_hidden_needs_cloak_and_no_flags() {
        let mut ship = Ship::new(1, "s", 0, Point::new(0.0, 0.0));
        assert!(!ship.is_hidden());
        ship.loadout.modules[0] = MODULE_CLOAK;
        ship.modules_active[0] = true;
        assert!(ship.is_hidden());
        ship.flags = 1;
        assert!(!ship.is_hidden());
    }
}
