// Engine tuning constants. Distances are world units, times are milliseconds,
// speeds are world units per millisecond.

// Ships
pub const SHIP_RADIUS: f32 = 24.0;
pub const SHIP_MAX_SPEED: f32 = 1.0; // per-axis cap on queued move components
pub const SHIP_MAX_HEALTH: f32 = 1.0;
pub const SHIP_MAX_ENERGY: f32 = 1.0;
pub const ENERGY_RECHARGE_PER_MS: f32 = 0.0002;
pub const MODULE_DRAIN_PER_MS: f32 = 0.0005;
pub const REPAIR_RATE_PER_MS: f32 = 0.0001;
pub const BOOST_FACTOR: f32 = 1.5;
pub const PLAYER_VIS_RADIUS: f32 = 600.0;

pub const SHIP_MODULE_COUNT: usize = 2;
pub const SHIP_WEAPON_COUNT: usize = 3;

// Modules
pub const MODULE_SHIELD: u8 = 0;
pub const MODULE_BOOST: u8 = 1;
pub const MODULE_SENSOR: u8 = 2;
pub const MODULE_REPAIR: u8 = 3;
pub const MODULE_ENGINEER: u8 = 4;
pub const MODULE_CLOAK: u8 = 5;
pub const MODULE_ARMOR: u8 = 6;
pub const MODULE_COUNT: usize = 7;

// Weapons
pub const WEAPON_PHASER: u8 = 0;
pub const WEAPON_BOUNCE: u8 = 1;
pub const WEAPON_TRIPLE: u8 = 2;
pub const WEAPON_BURST: u8 = 3;
pub const WEAPON_MINE: u8 = 4;
pub const WEAPON_SPY_BUG: u8 = 5;
pub const WEAPON_COUNT: usize = 6;

// Weapon tables indexed by weapon id: projectile speed, lifetime, energy
// drain per shot, damage fraction, refire delay.
pub const WEAPON_PROJ_SPEED: [f32; WEAPON_COUNT] = [0.6, 0.54, 0.6, 0.5, 0.0, 0.0];
pub const WEAPON_PROJ_LIFE_MS: [u32; WEAPON_COUNT] = [1000, 1500, 850, 1000, 60000, 60000];
pub const WEAPON_ENERGY_COST: [f32; WEAPON_COUNT] = [0.05, 0.08, 0.07, 0.15, 0.25, 0.2];
pub const WEAPON_DAMAGE: [f32; WEAPON_COUNT] = [0.21, 0.18, 0.14, 0.25, 0.5, 0.0];
pub const WEAPON_FIRE_DELAY_MS: [u32; WEAPON_COUNT] = [100, 200, 150, 500, 900, 800];

// Teleporters
pub const TELEPORTER_RADIUS: f32 = 75.0;
pub const TELEPORTER_TRIGGER_RADIUS: f32 = 50.0;
pub const TELEPORTER_DEFAULT_DELAY_MS: u32 = 1500;
pub const TELEPORTER_DEFAULT_COOLDOWN_MS: u32 = 1500;
pub const TELEPORTER_EXPLOSION_MS: u32 = 1000;

// Navmesh
pub const MAX_ZONES: usize = 10_000;
/// Offset applied before quantizing navmesh coordinates to u16.
pub const NAV_COORD_FIX: f32 = 32767.0;
pub const NAV_WORLD_PAD: f32 = 30.0;
pub const NAV_NVP: usize = 6;
/// Radius-squared of the first closest-visible-zone search pass (512^2).
pub const CLOSEST_ZONE_RADIUS_SQ: f32 = 262_144.0;

// Bots
pub const ROBOT_RESPAWN_DELAY_MS: u32 = 1500;
pub const LUA_MAX_INSTRUCTIONS: u32 = 1_000_000;
pub const DEFAULT_BOT_NAME: &str = "Bot";

// Teams visible to scripts are 1-based; these are the internal ids.
pub const TEAM_NEUTRAL: i32 = -1;
pub const TEAM_HOSTILE: i32 = -2;
