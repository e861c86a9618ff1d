// Script-facing host API. Each bot owns a private Lua VM; for the duration
// of a script call the shared world state is installed as app_data and every
// host function reaches it from there. Nothing here blocks, and every error
// surfaces as a Lua error contained to the calling bot.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use mlua::{Lua, Result as LuaResult, Table, Value, Variadic};

use super::config::*;
use super::events::{EventManager, EventType};
use super::geom::{Point, Rect};
use super::pathfinder::Pathfinder;
use super::ship::{Loadout, Projectile, Ship};
use super::spatial::{SpatialGrid, TypeMask};
use super::teleporter::Teleporter;
use super::zone::ZoneStore;

/// A chat line queued by a script; the game loop turns it into a
/// `MsgReceived` event after the emitting call returns.
#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub sender: u32,
    pub sender_name: String,
    pub text: String,
    pub global: bool,
}

/// Shared game state installed while one bot's script runs.
pub struct LuaBotContext {
    pub bot_id: u32,
    pub dt_ms: u32,
    pub game_time: i64,
    pub ships: Rc<RefCell<HashMap<u32, Ship>>>,
    pub projectiles: Rc<RefCell<Vec<Projectile>>>,
    pub teleporters: Rc<RefCell<Vec<Teleporter>>>,
    pub zones: Rc<ZoneStore>,
    pub grid: Rc<RefCell<SpatialGrid>>,
    pub pathfinder: Rc<RefCell<Pathfinder>>,
    pub events: Rc<RefCell<EventManager>>,
    pub pending_chat: Rc<RefCell<Vec<ChatMessage>>>,
    pub print_output: Rc<RefCell<Vec<String>>>,
    pub world_bounds: Rect,
}

pub fn set_context(lua: &Lua, ctx: Rc<RefCell<LuaBotContext>>) {
    lua.set_app_data(ctx);
}

pub fn clear_context(lua: &Lua) {
    lua.remove_app_data::<Rc<RefCell<LuaBotContext>>>();
}

fn get_ctx(lua: &Lua) -> LuaResult<Rc<RefCell<LuaBotContext>>> {
    lua.app_data_ref::<Rc<RefCell<LuaBotContext>>>()
        .map(|r| r.clone())
        .ok_or_else(|| mlua::Error::runtime("game state not available outside a script call"))
}

fn with_ship<R>(ctx: &LuaBotContext, f: impl FnOnce(&Ship) -> R) -> LuaResult<R> {
    let ships = ctx.ships.borrow();
    let ship = ships
        .get(&ctx.bot_id)
        .ok_or_else(|| mlua::Error::runtime("bot has no ship"))?;
    Ok(f(ship))
}

fn with_ship_mut<R>(ctx: &LuaBotContext, f: impl FnOnce(&mut Ship) -> R) -> LuaResult<R> {
    let mut ships = ctx.ships.borrow_mut();
    let ship = ships
        .get_mut(&ctx.bot_id)
        .ok_or_else(|| mlua::Error::runtime("bot has no ship"))?;
    Ok(f(ship))
}

pub fn point_table(lua: &Lua, p: Point) -> LuaResult<Table> {
    let t = lua.create_table()?;
    t.set("x", p.x)?;
    t.set("y", p.y)?;
    Ok(t)
}

fn point_from_value(v: &Value) -> LuaResult<Point> {
    match v {
        Value::Table(t) => {
            let x: f32 = t.get("x")?;
            let y: f32 = t.get("y")?;
            Ok(Point::new(x, y))
        }
        _ => Err(mlua::Error::runtime("expected a point table {x, y}")),
    }
}

/// Team index as scripts see it: first team is 1, neutral 0, hostile -1.
fn lua_team(team: i32) -> i32 {
    team + 1
}

/// Register the enum constants every bot script can rely on.
pub fn register_constants(lua: &Lua) -> LuaResult<()> {
    let g = lua.globals();

    // Object types (spatial type mask bits)
    g.set("ShipType", TypeMask::SHIP.bits())?;
    g.set("RobotType", TypeMask::ROBOT.bits())?;
    g.set("BarrierType", TypeMask::BARRIER.bits())?;
    g.set("BulletType", TypeMask::BULLET.bits())?;
    g.set("TeleportType", TypeMask::TELEPORTER.bits())?;
    g.set("BotNavMeshZoneType", TypeMask::NAV_ZONE.bits())?;
    g.set("LoadoutZoneType", TypeMask::LOADOUT_ZONE.bits())?;
    g.set("FlagType", TypeMask::FLAG.bits())?;
    g.set("TurretType", TypeMask::TURRET.bits())?;

    // Modules
    g.set("ModuleShield", MODULE_SHIELD as i32)?;
    g.set("ModuleBoost", MODULE_BOOST as i32)?;
    g.set("ModuleSensor", MODULE_SENSOR as i32)?;
    g.set("ModuleRepair", MODULE_REPAIR as i32)?;
    g.set("ModuleEngineer", MODULE_ENGINEER as i32)?;
    g.set("ModuleCloak", MODULE_CLOAK as i32)?;
    g.set("ModuleArmor", MODULE_ARMOR as i32)?;

    // Weapons
    g.set("WeaponPhaser", WEAPON_PHASER as i32)?;
    g.set("WeaponBounce", WEAPON_BOUNCE as i32)?;
    g.set("WeaponTriple", WEAPON_TRIPLE as i32)?;
    g.set("WeaponBurst", WEAPON_BURST as i32)?;
    g.set("WeaponMine", WEAPON_MINE as i32)?;
    g.set("WeaponSpyBug", WEAPON_SPY_BUG as i32)?;

    // Game types
    g.set("BitmatchGame", 0)?;
    g.set("CTFGame", 1)?;
    g.set("HTFGame", 2)?;
    g.set("NexusGame", 3)?;
    g.set("RabbitGame", 4)?;
    g.set("RetrieveGame", 5)?;
    g.set("SoccerGame", 6)?;
    g.set("ZoneControlGame", 7)?;

    // Scoring events
    g.set("KillEnemy", 0)?;
    g.set("KillSelf", 1)?;
    g.set("KillTeammate", 2)?;
    g.set("KilledByAsteroid", 3)?;
    g.set("KilledByTurret", 4)?;
    g.set("CaptureFlag", 5)?;
    g.set("CaptureZone", 6)?;
    g.set("UncaptureZone", 7)?;
    g.set("ReturnTeamFlag", 8)?;
    g.set("LostFlag", 9)?;

    // Event handler events
    g.set("ShipSpawnedEvent", EventType::ShipSpawned as i32)?;
    g.set("ShipKilledEvent", EventType::ShipKilled as i32)?;
    g.set("MsgReceivedEvent", EventType::MsgReceived as i32)?;
    g.set("PlayerJoinedEvent", EventType::PlayerJoined as i32)?;
    g.set("PlayerLeftEvent", EventType::PlayerLeft as i32)?;

    // Teams are 1-based in scripts.
    g.set("NeutralTeamIndx", lua_team(TEAM_NEUTRAL))?;
    g.set("HostileTeamIndx", lua_team(TEAM_HOSTILE))?;

    Ok(())
}

/// Summary table for a ship, as handed to queries and event handlers.
pub fn ship_info_table<'a>(lua: &'a Lua, ship: &Ship) -> LuaResult<Table<'a>> {
    let t = lua.create_table()?;
    t.set("id", ship.id)?;
    t.set(
        "classid",
        if ship.is_robot {
            TypeMask::ROBOT.bits()
        } else {
            TypeMask::SHIP.bits()
        },
    )?;
    t.set("name", ship.name.as_str())?;
    t.set("team", lua_team(ship.team))?;
    t.set("loc", point_table(lua, ship.pos)?)?;
    t.set("vel", point_table(lua, ship.vel)?)?;
    t.set("alive", !ship.exploded)?;
    Ok(t)
}

/// Player identity table used by join/leave/message events.
pub fn player_info_table<'a>(lua: &'a Lua, id: u32, name: &str, team: i32, is_robot: bool) -> LuaResult<Table<'a>> {
    let t = lua.create_table()?;
    t.set("id", id)?;
    t.set("name", name)?;
    t.set("team", lua_team(team))?;
    t.set("isRobot", is_robot)?;
    Ok(t)
}

// ---------------------------------------------------------------------------
// Lead-shot solver
// ---------------------------------------------------------------------------

/// Everything the solver needs to know about a shot target.
#[derive(Clone, Copy, Debug)]
pub struct TargetInfo {
    pub id: u32,
    pub pos: Point,
    pub vel: Point,
    pub team: i32,
    pub is_ship: bool,
    pub hidden: bool,
    pub exploded: bool,
}

/// Lowest root of `a x^2 + b x + c = 0` in `(0, upper]`.
pub fn find_lowest_root_in_interval(a: f32, b: f32, c: f32, upper: f32) -> Option<f32> {
    const EPS: f32 = 1e-9;
    if a.abs() < EPS {
        if b.abs() < EPS {
            return None;
        }
        let x = -c / b;
        return (x > 0.0 && x <= upper).then_some(x);
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let r1 = (-b - sq) / (2.0 * a);
    let r2 = (-b + sq) / (2.0 * a);
    let (lo, hi) = if r1 <= r2 { (r1, r2) } else { (r2, r1) };
    if lo > 0.0 && lo <= upper {
        Some(lo)
    } else if hi > 0.0 && hi <= upper {
        Some(hi)
    } else {
        None
    }
}

/// First ship hit by the ray, ignoring the aimer and the target itself.
/// Returns that ship's team.
fn first_ship_team_on_ray(
    ships: &HashMap<u32, Ship>,
    from: Point,
    to: Point,
    aimer: u32,
    target: u32,
) -> Option<i32> {
    let d = to - from;
    let len_sq = d.len_squared();
    if len_sq <= f32::EPSILON {
        return None;
    }
    let mut best: Option<(f32, i32)> = None;
    for ship in ships.values() {
        if ship.id == aimer || ship.id == target || ship.exploded {
            continue;
        }
        let t = ((ship.pos - from).dot(d) / len_sq).clamp(0.0, 1.0);
        let closest = from + d * t;
        if closest.distance_to(ship.pos) <= ship.radius
            && best.map(|(bt, _)| t < bt).unwrap_or(true)
        {
            best = Some((t, ship.team));
        }
    }
    best.map(|(_, team)| team)
}

/// Lead-shot solver shared by `get_firing_solution` and
/// `get_intercept_course`. Speeds are units per millisecond; the lifetime
/// bounds the intercept time in milliseconds.
#[allow(clippy::too_many_arguments)]
pub fn calc_intercept_course(
    target: &TargetInfo,
    aim_pos: Point,
    aim_radius: f32,
    aim_team: i32,
    proj_speed: f32,
    proj_life_ms: f32,
    ignore_friendly: bool,
    grid: &SpatialGrid,
    ships: &HashMap<u32, Ship>,
    aimer_id: u32,
) -> Option<f32> {
    // The shot leaves from the hull, not the center; 1.2 keeps the bot from
    // refusing to fire because it would clip itself.
    let aim_pos = aim_pos + (target.pos - aim_pos).normalize_to(aim_radius * 1.2);

    if target.is_ship && (target.hidden || target.exploded) {
        return None;
    }
    if ignore_friendly && target.team == aim_team {
        return None;
    }

    let vs = target.vel;
    let d = target.pos - aim_pos;
    let t = find_lowest_root_in_interval(
        vs.dot(vs) - proj_speed * proj_speed,
        2.0 * vs.dot(d),
        d.dot(d),
        proj_life_ms,
    )?;
    let lead = target.pos + vs * t;

    if !grid.point_can_see_point(aim_pos, target.pos) {
        return None;
    }

    let delta = lead - aim_pos;
    let reach = delta.normalize_to(proj_life_ms * proj_speed);
    if ignore_friendly {
        if let Some(team) =
            first_ship_team_on_ray(ships, aim_pos, aim_pos + reach, aimer_id, target.id)
        {
            if team == aim_team {
                return None;
            }
        }
    }

    Some(delta.y.atan2(delta.x))
}

// ---------------------------------------------------------------------------
// Line of sight and waypoints
// ---------------------------------------------------------------------------

/// A bot "sees" a point when both flight-lane edge rays, offset by its
/// radius perpendicular to the look direction, are clear.
pub fn bot_can_see_point(grid: &SpatialGrid, pos: Point, radius: f32, target: Point) -> bool {
    let ang = pos.angle_to(target);
    let sin = ang.sin() * radius;
    let cos = ang.cos() * radius;
    let edge1 = pos + Point::new(sin, -cos);
    let edge2 = pos + Point::new(-sin, cos);
    grid.point_can_see_point(edge1, target) && grid.point_can_see_point(edge2, target)
}

/// Closest zone whose center can see the point. A short-radius pass runs
/// first; if nothing is visible within it the whole map is scanned.
pub fn find_closest_zone(zones: &ZoneStore, grid: &SpatialGrid, point: Point) -> Option<u16> {
    let mut dist_sq = CLOSEST_ZONE_RADIUS_SQ;
    for _pass in 0..2 {
        let mut closest = None;
        for zone in zones.zones() {
            let d = zone.centroid.dist_squared(point);
            if d < dist_sq && grid.point_can_see_point(zone.centroid, point) {
                closest = Some(zone.id);
                dist_sq = d;
            }
        }
        if closest.is_some() {
            return closest;
        }
        dist_sq = f32::MAX;
    }
    None
}

/// Zone the ship currently stands in, computed lazily and cached until the
/// ship moves.
fn current_zone(ship: &mut Ship, zones: &ZoneStore) -> Option<u16> {
    if ship.current_zone.is_none() {
        ship.current_zone = zones.find_zone_containing(ship.pos);
    }
    ship.current_zone
}

/// The next waypoint toward `target`, reusing the cached flight plan when it
/// still leads to the target's zone.
fn next_waypoint(ctx: &LuaBotContext, target: Point) -> LuaResult<Option<Point>> {
    let grid = ctx.grid.borrow();
    let zones = &ctx.zones;
    let mut ships = ctx.ships.borrow_mut();
    let ship = ships
        .get_mut(&ctx.bot_id)
        .ok_or_else(|| mlua::Error::runtime("bot has no ship"))?;

    // Straight shot: no plan needed.
    if grid.point_can_see_point(ship.pos, target) {
        return Ok(Some(target));
    }

    let goal_zone = match zones
        .find_zone_containing(target)
        .or_else(|| find_closest_zone(zones, &grid, target))
    {
        Some(z) => z,
        None => return Ok(None),
    };

    // Reuse the cached plan while it still targets the same zone. Waypoints
    // are ordered target-first, so the bot consumes from the back; any back
    // entry it can already see is superfluous.
    if !ship.flight_plan.is_empty() && ship.flight_plan_to == Some(goal_zone) {
        ship.flight_plan[0] = target;
        let mut dest = None;
        let mut first = true;
        while let Some(&last) = ship.flight_plan.last() {
            // Assume a waypoint seen last turn is still visible; this avoids
            // re-pathing every time the hull swings around a corner.
            if first || bot_can_see_point(&grid, ship.pos, ship.radius, last) {
                dest = Some(last);
                first = false;
                ship.flight_plan.pop();
            } else {
                break;
            }
        }
        if let Some(d) = dest {
            ship.flight_plan.push(d);
            return Ok(Some(d));
        }
    }

    // The plan is stale; build a fresh one.
    ship.flight_plan.clear();
    let mut cz = current_zone(ship, zones);
    if cz.is_none() {
        cz = find_closest_zone(zones, &grid, ship.pos);
    }
    let Some(cz) = cz else {
        return Ok(None);
    };

    if cz == goal_zone {
        ship.flight_plan_to = Some(goal_zone);
        if bot_can_see_point(&grid, ship.pos, ship.radius, target) {
            ship.flight_plan.push(target);
            return Ok(Some(target));
        }
        let center = zones.get(goal_zone).unwrap().centroid;
        ship.flight_plan.push(target);
        ship.flight_plan.push(center);
        return Ok(Some(center));
    }

    let path = ctx
        .pathfinder
        .borrow_mut()
        .find_path(zones, cz, goal_zone, target);
    if path.is_empty() {
        return Ok(None);
    }
    ship.flight_plan_to = Some(goal_zone);
    ship.flight_plan = path;
    Ok(Some(*ship.flight_plan.last().unwrap()))
}

// ---------------------------------------------------------------------------
// Item queries
// ---------------------------------------------------------------------------

fn push_items<'a>(lua: &'a Lua, ctx: &LuaBotContext, mask: TypeMask, scope: Rect) -> LuaResult<Table<'a>> {
    let grid = ctx.grid.borrow();
    let ships = ctx.ships.borrow();
    let teleporters = ctx.teleporters.borrow();
    let projectiles = ctx.projectiles.borrow();

    let out = lua.create_table()?;
    let mut pushed = 0i64;
    for id in grid.find_in_rect(mask, scope) {
        let Some(entry) = grid.entry(id) else { continue };
        let item: Option<Table> = if entry.mask.intersects(TypeMask::ANY_SHIP) {
            match ships.get(&id) {
                Some(ship) if ship.id != ctx.bot_id && !ship.exploded && !ship.is_hidden() => {
                    Some(ship_info_table(lua, ship)?)
                }
                _ => None,
            }
        } else if entry.mask.intersects(TypeMask::TELEPORTER) {
            teleporters.iter().find(|t| t.id == id).and_then(|tp| {
                let t = lua.create_table().ok()?;
                t.set("id", tp.id).ok()?;
                t.set("classid", TypeMask::TELEPORTER.bits()).ok()?;
                t.set("loc", point_table(lua, tp.entry).ok()?).ok()?;
                t.set("vel", point_table(lua, Point::default()).ok()?).ok()?;
                t.set("team", lua_team(TEAM_NEUTRAL)).ok()?;
                t.set("engineered", tp.engineered).ok()?;
                Some(t)
            })
        } else if entry.mask.intersects(TypeMask::BULLET) {
            projectiles.iter().find(|p| p.id == id).and_then(|p| {
                let t = lua.create_table().ok()?;
                t.set("id", p.id).ok()?;
                t.set("classid", TypeMask::BULLET.bits()).ok()?;
                t.set("loc", point_table(lua, p.pos).ok()?).ok()?;
                t.set("vel", point_table(lua, p.vel).ok()?).ok()?;
                t.set("team", lua_team(p.team)).ok()?;
                Some(t)
            })
        } else if entry.mask.intersects(TypeMask::BARRIER) {
            let t = lua.create_table()?;
            t.set("id", id)?;
            t.set("classid", TypeMask::BARRIER.bits())?;
            t.set("loc", point_table(lua, entry.extent.center())?)?;
            Some(t)
        } else {
            None
        };
        if let Some(item) = item {
            pushed += 1;
            out.set(pushed, item)?;
        }
    }
    Ok(out)
}

fn mask_from_args(args: &Variadic<i64>) -> TypeMask {
    let mut bits = 0u32;
    for &a in args.iter() {
        bits |= a as u32;
    }
    TypeMask::from_bits_truncate(bits)
}

fn resolve_target(ctx: &LuaBotContext, item: &Table) -> Option<TargetInfo> {
    let id: u32 = item.get("id").ok()?;
    let classid: u32 = item.get("classid").ok()?;
    let mask = TypeMask::from_bits_truncate(classid);
    if mask.intersects(TypeMask::ANY_SHIP) {
        let ships = ctx.ships.borrow();
        let ship = ships.get(&id)?;
        Some(TargetInfo {
            id,
            pos: ship.pos,
            vel: ship.vel,
            team: ship.team,
            is_ship: true,
            hidden: ship.is_hidden(),
            exploded: ship.exploded,
        })
    } else if mask.intersects(TypeMask::TELEPORTER) {
        let teleporters = ctx.teleporters.borrow();
        let tp = teleporters.iter().find(|t| t.id == id)?;
        Some(TargetInfo {
            id,
            pos: tp.entry,
            vel: Point::default(),
            team: TEAM_NEUTRAL,
            is_ship: false,
            hidden: false,
            exploded: tp.exploded(),
        })
    } else if mask.intersects(TypeMask::BULLET) {
        let projectiles = ctx.projectiles.borrow();
        let p = projectiles.iter().find(|p| p.id == id)?;
        Some(TargetInfo {
            id,
            pos: p.pos,
            vel: p.vel,
            team: p.team,
            is_ship: false,
            hidden: false,
            exploded: false,
        })
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Function registration
// ---------------------------------------------------------------------------

/// Install the full host API as globals in a bot VM.
pub fn register_functions(lua: &Lua) -> LuaResult<()> {
    let g = lua.globals();

    // --- Introspection ---

    g.set(
        "get_class_id",
        lua.create_function(|lua, ()| {
            let _ = get_ctx(lua)?;
            Ok(TypeMask::ROBOT.bits())
        })?,
    )?;

    g.set(
        "get_cpu_time",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let t = ctx.borrow().game_time;
            Ok(t)
        })?,
    )?;

    g.set(
        "get_time",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let dt = ctx.borrow().dt_ms;
            Ok(dt)
        })?,
    )?;

    g.set(
        "is_alive",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| !s.exploded)
        })?,
    )?;

    g.set(
        "get_loc",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let pos = with_ship(&ctx, |s| s.pos)?;
            point_table(lua, pos)
        })?,
    )?;

    g.set(
        "get_rad",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| s.radius)
        })?,
    )?;

    g.set(
        "get_vel",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let vel = with_ship(&ctx, |s| s.vel)?;
            point_table(lua, vel)
        })?,
    )?;

    g.set(
        "get_team_index",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| lua_team(s.team))
        })?,
    )?;

    g.set(
        "get_energy",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| s.energy)
        })?,
    )?;

    g.set(
        "get_health",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| s.health)
        })?,
    )?;

    g.set(
        "has_flag",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| s.flags > 0)
        })?,
    )?;

    g.set(
        "get_flag_count",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| s.flags)
        })?,
    )?;

    g.set(
        "get_angle",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| s.angle)
        })?,
    )?;

    g.set(
        "get_active_weapon",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| s.selected_weapon() as i32)
        })?,
    )?;

    g.set(
        "is_module_active",
        lua.create_function(|lua, module: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| {
                u8::try_from(module)
                    .map(|m| s.is_module_active(m))
                    .unwrap_or(false)
            })
        })?,
    )?;

    g.set(
        "get_curr_loadout",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let items = with_ship(&ctx, |s| s.loadout.items())?;
            let t = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                t.set(i + 1, *item as i32)?;
            }
            Ok(t)
        })?,
    )?;

    g.set(
        "get_req_loadout",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let items = with_ship(&ctx, |s| s.req_loadout.unwrap_or(s.loadout).items())?;
            let t = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                t.set(i + 1, *item as i32)?;
            }
            Ok(t)
        })?,
    )?;

    // --- Movement ---

    g.set(
        "set_angle",
        lua.create_function(|lua, v: Value| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let angle = match &v {
                Value::Number(n) => *n as f32,
                Value::Integer(n) => *n as f32,
                other => {
                    let p = point_from_value(other)?;
                    with_ship(&ctx, |s| s.angle_to_pt(p))?
                }
            };
            with_ship_mut(&ctx, |s| s.pending_move.angle = angle)
        })?,
    )?;

    g.set(
        "set_angle_pt",
        lua.create_function(|lua, v: Value| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let p = point_from_value(&v)?;
            with_ship_mut(&ctx, |s| {
                s.pending_move.angle = s.pos.angle_to(p);
            })
        })?,
    )?;

    g.set(
        "get_angle_pt",
        lua.create_function(|lua, v: Value| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let p = point_from_value(&v)?;
            with_ship(&ctx, |s| s.angle_to_pt(p))
        })?,
    )?;

    g.set(
        "set_thrust",
        lua.create_function(|lua, (vel, angle): (f32, f32)| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship_mut(&ctx, |s| s.pending_move.set_thrust(vel, angle))
        })?,
    )?;

    g.set(
        "set_thrust_pt",
        lua.create_function(|lua, (vel, v): (f32, Value)| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let p = point_from_value(&v)?;
            with_ship_mut(&ctx, |s| {
                let ang = s.pos.angle_to(p);
                s.pending_move.set_thrust(vel, ang);
            })
        })?,
    )?;

    g.set(
        "set_thrust_to_pt",
        lua.create_function(|lua, v: Value| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let p = point_from_value(&v)?;
            with_ship_mut(&ctx, |s| {
                let ang = s.pos.angle_to(p);
                let dist = s.pos.distance_to(p);
                let time = s.pending_move.time_ms.max(1) as f32;
                s.pending_move.set_thrust(dist / time, ang);
            })
        })?,
    )?;

    // --- Combat ---

    g.set(
        "fire",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship_mut(&ctx, |s| s.pending_move.fire = true)
        })?,
    )?;

    g.set(
        "set_weapon_index",
        lua.create_function(|lua, index: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            if !(1..=SHIP_WEAPON_COUNT as i64).contains(&index) {
                return Err(mlua::Error::runtime(format!(
                    "weapon index {index} out of range 1..{SHIP_WEAPON_COUNT}"
                )));
            }
            with_ship_mut(&ctx, |s| s.active_weapon = (index - 1) as usize)
        })?,
    )?;

    g.set(
        "set_weapon",
        lua.create_function(|lua, weapon: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship_mut(&ctx, |s| {
                // Selecting a weapon we do not carry quietly does nothing.
                if let Ok(w) = u8::try_from(weapon) {
                    if let Some(slot) = s.weapon_slot(w) {
                        s.active_weapon = slot;
                    }
                }
            })
        })?,
    )?;

    g.set(
        "has_weapon",
        lua.create_function(|lua, weapon: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship(&ctx, |s| {
                u8::try_from(weapon)
                    .map(|w| s.weapon_slot(w).is_some())
                    .unwrap_or(false)
            })
        })?,
    )?;

    g.set(
        "activate_module_index",
        lua.create_function(|lua, index: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            if !(1..=SHIP_MODULE_COUNT as i64).contains(&index) {
                return Err(mlua::Error::runtime(format!(
                    "module index {index} out of range 1..{SHIP_MODULE_COUNT}"
                )));
            }
            with_ship_mut(&ctx, |s| s.pending_move.modules[(index - 1) as usize] = true)
        })?,
    )?;

    g.set(
        "activate_module",
        lua.create_function(|lua, module: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            with_ship_mut(&ctx, |s| {
                if let Ok(m) = u8::try_from(module) {
                    if let Some(slot) = s.module_slot(m) {
                        s.pending_move.modules[slot] = true;
                    }
                }
            })
        })?,
    )?;

    g.set(
        "set_req_loadout",
        lua.create_function(|lua, t: Table| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let mut items = [0u8; SHIP_MODULE_COUNT + SHIP_WEAPON_COUNT];
            for (i, slot) in items.iter_mut().enumerate() {
                let v: i64 = t.get(i + 1)?;
                *slot = u8::try_from(v)
                    .map_err(|_| mlua::Error::runtime("loadout item out of range"))?;
            }
            let loadout = Loadout::from_items(items)
                .ok_or_else(|| mlua::Error::runtime("invalid loadout"))?;
            with_ship_mut(&ctx, |s| s.req_loadout = Some(loadout))
        })?,
    )?;

    // --- World queries ---

    g.set(
        "has_los_pt",
        lua.create_function(|lua, v: Value| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let p = point_from_value(&v)?;
            let grid = ctx.grid.borrow();
            with_ship(&ctx, |s| bot_can_see_point(&grid, s.pos, s.radius, p))
        })?,
    )?;

    g.set(
        "find_items",
        lua.create_function(|lua, args: Variadic<i64>| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let mask = mask_from_args(&args);
            let pos = with_ship(&ctx, |s| s.pos)?;
            let scope = Rect::around(pos, PLAYER_VIS_RADIUS);
            push_items(lua, &ctx, mask, scope)
        })?,
    )?;

    g.set(
        "find_global_items",
        lua.create_function(|lua, args: Variadic<i64>| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let mask = mask_from_args(&args);
            let scope = ctx.world_bounds;
            push_items(lua, &ctx, mask, scope)
        })?,
    )?;

    g.set(
        "get_firing_solution",
        lua.create_function(|lua, (_mask, item): (i64, Table)| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let Some(target) = resolve_target(&ctx, &item) else {
                return Ok(Value::Nil);
            };
            let (pos, radius, team, weapon) =
                with_ship(&ctx, |s| (s.pos, s.radius, s.team, s.selected_weapon()))?;
            let grid = ctx.grid.borrow();
            let ships = ctx.ships.borrow();
            let angle = calc_intercept_course(
                &target,
                pos,
                radius,
                team,
                WEAPON_PROJ_SPEED[weapon as usize],
                WEAPON_PROJ_LIFE_MS[weapon as usize] as f32,
                false,
                &grid,
                &ships,
                ctx.bot_id,
            );
            match angle {
                Some(a) => Ok(Value::Number(a as f64)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    g.set(
        "get_intercept_course",
        lua.create_function(|lua, (_mask, item): (i64, Table)| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let Some(target) = resolve_target(&ctx, &item) else {
                return Ok(Value::Nil);
            };
            let (pos, radius, team) = with_ship(&ctx, |s| (s.pos, s.radius, s.team))?;
            let grid = ctx.grid.borrow();
            let ships = ctx.ships.borrow();
            // Fixed ship-speed assumption rather than a projectile profile.
            let angle = calc_intercept_course(
                &target, pos, radius, team, 0.256, 3000.0, false, &grid, &ships, ctx.bot_id,
            );
            match angle {
                Some(a) => Ok(Value::Number(a as f64)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    // --- Navmesh queries ---

    g.set(
        "get_zone_center",
        lua.create_function(|lua, zone: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let Ok(id) = u16::try_from(zone) else {
                return Ok(Value::Nil);
            };
            match ctx.zones.get(id) {
                Some(z) => Ok(Value::Table(point_table(lua, z.centroid)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    g.set(
        "get_gateway_from_zone_to_zone",
        lua.create_function(|lua, (from, to): (i64, i64)| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let (Ok(from), Ok(to)) = (u16::try_from(from), u16::try_from(to)) else {
                return Ok(Value::Nil);
            };
            let Some(zone) = ctx.zones.get(from) else {
                return Ok(Value::Nil);
            };
            if ctx.zones.get(to).is_none() {
                return Ok(Value::Nil);
            }
            match zone.neighbor_index(to) {
                Some(i) => {
                    let nb = &zone.neighbors[i];
                    let mid = Rect::from_points(nb.border_start, nb.border_end).center();
                    Ok(Value::Table(point_table(lua, mid)?))
                }
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    g.set(
        "get_zone_count",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let n = ctx.borrow().zones.len() as i64;
            Ok(n)
        })?,
    )?;

    g.set(
        "get_current_zone",
        lua.create_function(|lua, ()| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let zones = ctx.zones.clone();
            let zone = with_ship_mut(&ctx, |s| current_zone(s, &zones))?;
            match zone {
                Some(z) => Ok(Value::Integer(z as i64)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    g.set(
        "get_waypoint",
        lua.create_function(|lua, v: Value| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let target = point_from_value(&v)?;
            match next_waypoint(&ctx, target)? {
                Some(p) => Ok(Value::Table(point_table(lua, p)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    // --- Communication ---

    g.set(
        "global_msg",
        lua.create_function(|lua, text: String| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let name = with_ship(&ctx, |s| s.name.clone())?;
            ctx.pending_chat.borrow_mut().push(ChatMessage {
                sender: ctx.bot_id,
                sender_name: name,
                text,
                global: true,
            });
            Ok(())
        })?,
    )?;

    g.set(
        "team_msg",
        lua.create_function(|lua, text: String| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let name = with_ship(&ctx, |s| s.name.clone())?;
            ctx.pending_chat.borrow_mut().push(ChatMessage {
                sender: ctx.bot_id,
                sender_name: name,
                text,
                global: false,
            });
            Ok(())
        })?,
    )?;

    // --- Events ---

    g.set(
        "subscribe",
        lua.create_function(|lua, evt: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let Some(evt) = EventType::from_i64(evt) else {
                return Ok(());
            };
            ctx.events.borrow_mut().subscribe(ctx.bot_id, evt);
            with_ship_mut(&ctx, |s| s.subscriptions |= evt.set_bit())
        })?,
    )?;

    g.set(
        "unsubscribe",
        lua.create_function(|lua, evt: i64| {
            let ctx = get_ctx(lua)?;
            let ctx = ctx.borrow();
            let Some(evt) = EventType::from_i64(evt) else {
                return Ok(());
            };
            ctx.events.borrow_mut().unsubscribe(ctx.bot_id, evt);
            with_ship_mut(&ctx, |s| s.subscriptions -= evt.set_bit())
        })?,
    )?;

    // --- Output capture ---

    g.set(
        "print",
        lua.create_function(|lua, args: Variadic<Value>| {
            let mut parts = Vec::new();
            for val in args.iter() {
                match val {
                    Value::Nil => parts.push("nil".to_string()),
                    Value::Boolean(b) => parts.push(b.to_string()),
                    Value::Integer(n) => parts.push(n.to_string()),
                    Value::Number(n) => parts.push(n.to_string()),
                    Value::String(s) => {
                        parts.push(s.to_str().map(|s| s.to_string()).unwrap_or_default())
                    }
                    other => parts.push(format!("{other:?}")),
                }
            }
            let line = parts.join("\t");
            let ctx = get_ctx(lua)?;
            ctx.borrow().print_output.borrow_mut().push(line);
            Ok(())
        })?,
    )?;

    Ok(())
}
