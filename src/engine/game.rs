// Per-server game context: owns the world, the zone store, ships, bots,
// teleporters and the event manager, and drives one tick of the cooperative
// loop. Everything runs on a single thread; shared pieces are Rc<RefCell>
// handles passed into each bot's script context.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use mlua::{Lua, Value};
use rand::Rng;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::HostConfig;

use super::config::*;
use super::events::{EventManager, EventType};
use super::geom::{polygon_contains, Point, Rect};
use super::level::{LevelSpec, LoadoutZoneSpec, TeamSpec};
use super::lua_api::{self, ChatMessage, LuaBotContext};
use super::navmesh::{build_zones, GeneratorMode};
use super::pathfinder::Pathfinder;
use super::robot::{make_unique_name, BotError, Robot};
use super::ship::{Projectile, Ship};
use super::spatial::{SpatialGrid, TypeMask};
use super::teleporter::Teleporter;
use super::zone::ZoneStore;

/// Renderer-facing effect records drained by the host each tick.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Effect {
    #[serde(rename = "teleport")]
    Teleport { ship: u32, to: Point },
    #[serde(rename = "explosion")]
    Explosion { pos: Point },
    #[serde(rename = "ship_explosion")]
    ShipExplosion { ship: u32, pos: Point },
}

#[derive(Clone, Debug, Serialize)]
pub struct ShipSnapshot {
    pub id: u32,
    pub name: String,
    pub team: i32,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub health: f32,
    pub energy: f32,
    pub alive: bool,
    pub is_robot: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct GameSnapshot {
    pub game_time: i64,
    pub ships: Vec<ShipSnapshot>,
    pub zone_count: usize,
    pub teleporter_count: usize,
}

/// Event payload captured at fire time; rebuilt as Lua values per receiving
/// VM since tables cannot cross interpreters.
enum EventPayload {
    Ship {
        id: u32,
        name: String,
        team: i32,
        pos: Point,
        alive: bool,
    },
    Player {
        id: u32,
        name: String,
        team: i32,
    },
    Msg {
        id: u32,
        name: String,
        team: i32,
        text: String,
        global: bool,
    },
}

impl EventPayload {
    fn build<'l>(&self, lua: &'l Lua) -> mlua::Result<mlua::MultiValue<'l>> {
        match self {
            EventPayload::Ship {
                id,
                name,
                team,
                pos,
                alive,
            } => {
                let t = lua.create_table()?;
                t.set("id", *id)?;
                t.set("classid", TypeMask::ROBOT.bits())?;
                t.set("name", name.as_str())?;
                t.set("team", *team + 1)?;
                t.set("loc", lua_api::point_table(lua, *pos)?)?;
                t.set("alive", *alive)?;
                Ok(mlua::MultiValue::from_vec(vec![Value::Table(t)]))
            }
            EventPayload::Player { id, name, team } => {
                let t = lua_api::player_info_table(lua, *id, name, *team, true)?;
                Ok(mlua::MultiValue::from_vec(vec![Value::Table(t)]))
            }
            EventPayload::Msg {
                id,
                name,
                team,
                text,
                global,
            } => {
                let t = lua_api::player_info_table(lua, *id, name, *team, true)?;
                Ok(mlua::MultiValue::from_vec(vec![
                    Value::String(lua.create_string(text)?),
                    Value::Table(t),
                    Value::Boolean(*global),
                ]))
            }
        }
    }
}

pub struct Game {
    pub config: HostConfig,
    world_bounds: Rect,
    grid: Rc<RefCell<SpatialGrid>>,
    zones: Rc<ZoneStore>,
    bots_enabled: bool,
    ships: Rc<RefCell<HashMap<u32, Ship>>>,
    projectiles: Rc<RefCell<Vec<Projectile>>>,
    teleporters: Rc<RefCell<Vec<Teleporter>>>,
    events: Rc<RefCell<EventManager>>,
    pathfinder: Rc<RefCell<Pathfinder>>,
    pending_chat: Rc<RefCell<Vec<ChatMessage>>>,
    print_output: Rc<RefCell<Vec<String>>>,
    robot_output: RefCell<HashMap<u32, Vec<String>>>,
    robots: BTreeMap<u32, Robot>,
    pub chat_log: Vec<ChatMessage>,
    effects: Vec<Effect>,
    teams: Vec<TeamSpec>,
    loadout_zones: Vec<LoadoutZoneSpec>,
    game_time: i64,
    last_dt: u32,
    next_object_id: u32,
}

impl Game {
    /// Build a game from a level. Navmesh failures disable bot support but
    /// never abort the match.
    pub fn new(level: LevelSpec, config: HostConfig) -> Result<Game, super::level::LevelError> {
        level.validate()?;
        let world_bounds = level.world_bounds;
        let mut grid = SpatialGrid::new(world_bounds);
        let mut next_object_id = 1u32;

        for barrier in &level.barriers {
            let id = next_object_id;
            next_object_id += 1;
            grid.insert(
                id,
                TypeMask::BARRIER,
                Rect::bounding(&barrier.points),
                Some(barrier.points.clone()),
            );
        }

        let mode = config.generator_mode;
        let (zones, mut bots_enabled) = match build_zones(&level, mode) {
            Ok(store) => (store, mode != GeneratorMode::Disabled),
            Err(e) => {
                error!("navmesh generation failed, bots disabled: {e}");
                (ZoneStore::empty(world_bounds), false)
            }
        };
        if bots_enabled && zones.is_empty() {
            warn!("navmesh is empty, bots disabled");
            bots_enabled = false;
        }

        let mut teleporters = Vec::new();
        for (i, spec) in level.teleporters.iter().enumerate() {
            let id = next_object_id;
            next_object_id += 1;
            let tp = Teleporter::from_spec(id, i, spec)?;
            grid.insert(id, TypeMask::TELEPORTER, tp.extent(), None);
            teleporters.push(tp);
        }

        let mut game = Game {
            config,
            world_bounds,
            grid: Rc::new(RefCell::new(grid)),
            zones: Rc::new(zones),
            bots_enabled,
            ships: Rc::new(RefCell::new(HashMap::new())),
            projectiles: Rc::new(RefCell::new(Vec::new())),
            teleporters: Rc::new(RefCell::new(teleporters)),
            events: Rc::new(RefCell::new(EventManager::new())),
            pathfinder: Rc::new(RefCell::new(Pathfinder::new())),
            pending_chat: Rc::new(RefCell::new(Vec::new())),
            print_output: Rc::new(RefCell::new(Vec::new())),
            robot_output: RefCell::new(HashMap::new()),
            robots: BTreeMap::new(),
            chat_log: Vec::new(),
            effects: Vec::new(),
            teams: level.teams.clone(),
            loadout_zones: level.loadout_zones.clone(),
            game_time: 0,
            last_dt: 0,
            next_object_id,
        };

        for bot in &level.bots {
            if let Err(e) = game.add_robot_file(bot.team, &bot.script, bot.args.clone()) {
                // A broken bot never takes the match down with it.
                warn!(script = bot.script.as_str(), "bot omitted: {e}");
            }
        }

        info!(
            zones = game.zones.len(),
            bots = game.robots.len(),
            bots_enabled = game.bots_enabled,
            "game ready"
        );
        Ok(game)
    }

    // --- Accessors ---

    pub fn zones(&self) -> &ZoneStore {
        &self.zones
    }

    pub fn ships(&self) -> &Rc<RefCell<HashMap<u32, Ship>>> {
        &self.ships
    }

    pub fn game_time(&self) -> i64 {
        self.game_time
    }

    pub fn bots_enabled(&self) -> bool {
        self.bots_enabled
    }

    pub fn robot_ids(&self) -> Vec<u32> {
        self.robots.keys().copied().collect()
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Captured `print` output of one bot since the last call.
    pub fn robot_output(&self, id: u32) -> Vec<String> {
        self.robot_output.borrow_mut().remove(&id).unwrap_or_default()
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let ships = self.ships.borrow();
        GameSnapshot {
            game_time: self.game_time,
            ships: ships
                .values()
                .map(|s| ShipSnapshot {
                    id: s.id,
                    name: s.name.clone(),
                    team: s.team,
                    x: s.pos.x,
                    y: s.pos.y,
                    angle: s.angle,
                    health: s.health,
                    energy: s.energy,
                    alive: !s.exploded,
                    is_robot: s.is_robot,
                })
                .collect(),
            zone_count: self.zones.len(),
            teleporter_count: self.teleporters.borrow().len(),
        }
    }

    // --- Bot lifecycle ---

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn pick_spawn(&self, team: i32) -> Point {
        let spawns = usize::try_from(team)
            .ok()
            .and_then(|t| self.teams.get(t))
            .map(|t| t.spawn_points.as_slice())
            .unwrap_or(&[]);
        if spawns.is_empty() {
            self.world_bounds.center()
        } else {
            spawns[rand::thread_rng().gen_range(0..spawns.len())]
        }
    }

    pub fn add_robot_file(
        &mut self,
        team: i32,
        file: &str,
        args: Vec<String>,
    ) -> Result<u32, BotError> {
        let path = self.config.robot_dir.join(file);
        if !path.exists() {
            return Err(BotError::FileNotFound(path));
        }
        let source = std::fs::read_to_string(&path).map_err(|e| BotError::LoadError {
            file: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.add_robot_source(team, file, &source, args)
    }

    /// Create a bot from script source: fresh VM, helper + user script,
    /// name uniquification, one `main()` call, then event registration.
    pub fn add_robot_source(
        &mut self,
        team: i32,
        filename: &str,
        source: &str,
        args: Vec<String>,
    ) -> Result<u32, BotError> {
        if !self.bots_enabled {
            return Err(BotError::BotsDisabled);
        }
        let id = self.alloc_id();
        let pos = self.pick_spawn(team);
        let mut ship = Ship::new(id, DEFAULT_BOT_NAME, team, pos);
        ship.is_robot = true;
        self.ships.borrow_mut().insert(id, ship);
        self.grid
            .borrow_mut()
            .insert(id, TypeMask::ROBOT, Rect::around(pos, SHIP_RADIUS), None);

        let robot = Robot::new(id, team, filename, args)?;
        self.robots.insert(id, robot);

        let helper = self.config.lua_dir.join("bot_helpers.lua");
        match self.with_script(id, 0, |r| r.load(&helper, source)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                self.discard_robot(id);
                return Err(e);
            }
            None => unreachable!("robot just inserted"),
        }

        let name = self.with_script(id, 0, |r| r.script_name()).unwrap();
        let taken: Vec<String> = self.ships.borrow().values().map(|s| s.name.clone()).collect();
        let unique = make_unique_name(&name, &taken);
        self.ships.borrow_mut().get_mut(&id).unwrap().name = unique.clone();

        match self.with_script(id, 0, |r| r.run_main()).unwrap() {
            Ok(()) => {}
            Err(e) => {
                self.discard_robot(id);
                return Err(BotError::LoadError {
                    file: filename.to_string(),
                    message: format!("error running main(): {e}"),
                });
            }
        }

        // Registrations made during main() become active before the first
        // event can fire.
        self.events.borrow_mut().update();

        self.fire_event(
            EventType::PlayerJoined,
            Some(id),
            &EventPayload::Player {
                id,
                name: unique.clone(),
                team,
            },
        );
        self.fire_event(
            EventType::ShipSpawned,
            None,
            &EventPayload::Ship {
                id,
                name: unique,
                team,
                pos,
                alive: true,
            },
        );
        info!(bot = id, "robot added");
        Ok(id)
    }

    /// Silent teardown used when a bot fails to load.
    fn discard_robot(&mut self, id: u32) {
        self.robots.remove(&id);
        self.events.borrow_mut().drop_handle(id);
        self.ships.borrow_mut().remove(&id);
        self.grid.borrow_mut().remove(id);
    }

    /// Full removal of a live bot: subscriptions die first so no event can
    /// reach the freed interpreter, then the leave event goes out.
    pub fn remove_robot(&mut self, id: u32) {
        if !self.robots.contains_key(&id) {
            return;
        }
        self.events.borrow_mut().drop_handle(id);
        let info = self.ships.borrow().get(&id).map(|s| (s.name.clone(), s.team));
        if let Some((name, team)) = info {
            self.fire_event(
                EventType::PlayerLeft,
                Some(id),
                &EventPayload::Player { id, name, team },
            );
        }
        self.robots.remove(&id);
        self.ships.borrow_mut().remove(&id);
        self.grid.borrow_mut().remove(id);
        info!(bot = id, "robot removed");
    }

    // --- Tick loop ---

    /// One cooperative tick: reconcile subscriptions, drive teleporters, run
    /// every bot script, then integrate queued moves and projectiles. Bots
    /// observe world state as of the start of the tick; their moves apply
    /// after all scripts have run.
    pub fn tick(&mut self, dt_ms: u32) {
        self.last_dt = dt_ms;
        self.events.borrow_mut().update();
        self.tick_teleporters(dt_ms);
        self.tick_robots(dt_ms);
        self.integrate_moves(dt_ms);
        self.step_projectiles(dt_ms);
        self.game_time += dt_ms as i64;
    }

    fn tick_teleporters(&mut self, dt: u32) {
        let hops = {
            let mut teleporters = self.teleporters.borrow_mut();
            let mut ships = self.ships.borrow_mut();
            let mut rng = rand::thread_rng();
            let mut all = Vec::new();
            for tp in teleporters.iter_mut() {
                all.extend(tp.idle(dt, &mut ships, &mut rng));
            }
            let mut grid = self.grid.borrow_mut();
            teleporters.retain(|tp| {
                if tp.is_dead() {
                    grid.remove(tp.id);
                    false
                } else {
                    true
                }
            });
            all
        };

        for hop in hops {
            let mut ships = self.ships.borrow_mut();
            let Some(ship) = ships.get_mut(&hop.ship_id) else {
                continue;
            };
            self.grid.borrow_mut().update_extent(ship.id, ship.extent());
            // Landing on a loadout zone grants the requested loadout.
            for lz in &self.loadout_zones {
                if (lz.team == TEAM_NEUTRAL || lz.team == ship.team)
                    && polygon_contains(&lz.points, ship.pos)
                {
                    ship.apply_requested_loadout();
                    break;
                }
            }
            self.effects.push(Effect::Teleport {
                ship: hop.ship_id,
                to: hop.dest,
            });
        }
    }

    fn tick_robots(&mut self, dt: u32) {
        // A zero delta would divide by zero further down; skip the round.
        if dt == 0 {
            return;
        }
        let ids: Vec<u32> = self.robots.keys().copied().collect();
        for id in ids {
            let state = self.ships.borrow().get(&id).map(|s| (s.exploded, s.angle));
            let Some((exploded, angle)) = state else {
                continue;
            };

            if exploded {
                let respawn_now = {
                    let mut ships = self.ships.borrow_mut();
                    let ship = ships.get_mut(&id).unwrap();
                    ship.respawn_remaining = ship.respawn_remaining.saturating_sub(dt);
                    ship.respawn_remaining == 0
                };
                if respawn_now {
                    self.spawn_robot(id);
                }
                continue;
            }

            {
                let mut ships = self.ships.borrow_mut();
                let ship = ships.get_mut(&id).unwrap();
                ship.pending_move = super::ship::Move::cleared(angle, dt);
            }

            let Some(result) = self.with_script(id, dt, |r| r.on_tick(dt)) else {
                continue;
            };
            if let Err(e) = result {
                warn!(bot = id, "script error in _onTick, removing bot: {e}");
                self.remove_robot(id);
                continue;
            }

            self.flush_chat();
        }
    }

    /// Fire queued chat lines as MsgReceived events, skipping each sender.
    fn flush_chat(&mut self) {
        let msgs: Vec<ChatMessage> = self.pending_chat.borrow_mut().drain(..).collect();
        for msg in msgs {
            let team = self
                .ships
                .borrow()
                .get(&msg.sender)
                .map(|s| s.team)
                .unwrap_or(TEAM_NEUTRAL);
            self.fire_event(
                EventType::MsgReceived,
                Some(msg.sender),
                &EventPayload::Msg {
                    id: msg.sender,
                    name: msg.sender_name.clone(),
                    team,
                    text: msg.text.clone(),
                    global: msg.global,
                },
            );
            self.chat_log.push(msg);
        }
    }

    /// Respawn an exploded bot at a team spawn point.
    fn spawn_robot(&mut self, id: u32) {
        let team = match self.ships.borrow().get(&id) {
            Some(s) => s.team,
            None => return,
        };
        let pos = self.pick_spawn(team);
        let name = {
            let mut ships = self.ships.borrow_mut();
            let Some(ship) = ships.get_mut(&id) else {
                return;
            };
            ship.spawn_at(pos);
            self.grid.borrow_mut().update_extent(id, ship.extent());
            ship.name.clone()
        };
        self.fire_event(
            EventType::ShipSpawned,
            None,
            &EventPayload::Ship {
                id,
                name,
                team,
                pos,
                alive: true,
            },
        );
    }

    fn with_script<R>(&self, id: u32, dt: u32, f: impl FnOnce(&Robot) -> R) -> Option<R> {
        let robot = self.robots.get(&id)?;
        let ctx = Rc::new(RefCell::new(LuaBotContext {
            bot_id: id,
            dt_ms: dt,
            game_time: self.game_time,
            ships: self.ships.clone(),
            projectiles: self.projectiles.clone(),
            teleporters: self.teleporters.clone(),
            zones: self.zones.clone(),
            grid: self.grid.clone(),
            pathfinder: self.pathfinder.clone(),
            events: self.events.clone(),
            pending_chat: self.pending_chat.clone(),
            print_output: self.print_output.clone(),
            world_bounds: self.world_bounds,
        }));
        lua_api::set_context(&robot.lua, ctx);
        let _ = robot.lua.set_hook(
            mlua::HookTriggers::new().every_nth_instruction(LUA_MAX_INSTRUCTIONS),
            |_lua, _debug| Err(mlua::Error::RuntimeError("lua vm cycles exceeded".into())),
        );
        let result = f(robot);
        robot.lua.remove_hook();
        lua_api::clear_context(&robot.lua);

        let mut captured = self.print_output.borrow_mut();
        if !captured.is_empty() {
            self.robot_output
                .borrow_mut()
                .entry(id)
                .or_default()
                .extend(captured.drain(..));
        }
        Some(result)
    }

    fn fire_event(&mut self, evt: EventType, sender: Option<u32>, payload: &EventPayload) {
        let subs: Vec<u32> = self.events.borrow().subscribers(evt).to_vec();
        for sid in subs {
            if Some(sid) == sender {
                continue;
            }
            if !self.robots.contains_key(&sid) {
                continue;
            }
            let dt = self.last_dt;
            let result = self
                .with_script(sid, dt, |robot| -> mlua::Result<()> {
                    let callback: mlua::Function = robot.lua.globals().get(evt.callback_name())?;
                    let args = payload.build(&robot.lua)?;
                    callback.call(args)
                })
                .unwrap();
            if let Err(e) = result {
                // A broken handler must not starve the remaining subscribers.
                warn!(event = evt as i32, bot = sid, "bot error firing event: {e}");
            }
        }
    }

    // --- Physics ---

    fn integrate_moves(&mut self, dt: u32) {
        struct FireRequest {
            owner: u32,
            team: i32,
            pos: Point,
            angle: f32,
            ship_vel: Point,
            weapon: u8,
        }
        let mut fire_requests = Vec::new();
        {
            let mut ships = self.ships.borrow_mut();
            let mut grid = self.grid.borrow_mut();
            for ship in ships.values_mut() {
                if ship.exploded {
                    continue;
                }
                let mv = ship.pending_move;
                if mv.time_ms == 0 {
                    continue;
                }
                ship.angle = mv.angle;

                // Modules hold only for the tick that requested them.
                for slot in 0..SHIP_MODULE_COUNT {
                    let drain = MODULE_DRAIN_PER_MS * dt as f32;
                    if mv.modules[slot] && ship.energy >= drain {
                        ship.modules_active[slot] = true;
                        ship.energy -= drain;
                    } else {
                        ship.modules_active[slot] = false;
                    }
                }

                if ship.is_module_active(MODULE_REPAIR) {
                    ship.health = (ship.health + REPAIR_RATE_PER_MS * dt as f32)
                        .min(SHIP_MAX_HEALTH);
                }

                let mut disp = mv.displacement();
                if ship.is_module_active(MODULE_BOOST) {
                    disp = disp * BOOST_FACTOR;
                }
                if disp.len_squared() > 0.0 {
                    let new_pos = ship.pos + disp;
                    // Never tunnel through a wall; a blocked move parks the
                    // ship for the tick.
                    if grid.point_can_see_point(ship.pos, new_pos) {
                        ship.pos = new_pos;
                        ship.vel = disp * (1.0 / mv.time_ms as f32);
                        ship.current_zone = None;
                        let extent = ship.extent();
                        grid.update_extent(ship.id, extent);
                    } else {
                        ship.vel = Point::default();
                    }
                } else {
                    ship.vel = Point::default();
                }

                ship.energy = (ship.energy + ENERGY_RECHARGE_PER_MS * dt as f32)
                    .min(SHIP_MAX_ENERGY);

                if mv.fire {
                    let weapon = ship.selected_weapon();
                    let cost = WEAPON_ENERGY_COST[weapon as usize];
                    let delay = WEAPON_FIRE_DELAY_MS[weapon as usize] as i64;
                    if ship.energy >= cost && self.game_time - ship.last_fire_time >= delay {
                        ship.energy -= cost;
                        ship.last_fire_time = self.game_time;
                        fire_requests.push(FireRequest {
                            owner: ship.id,
                            team: ship.team,
                            pos: ship.pos + Point::polar(ship.radius * 1.2, ship.angle),
                            angle: ship.angle,
                            ship_vel: ship.vel,
                            weapon,
                        });
                    }
                }
            }
        }

        for req in fire_requests {
            let id = self.alloc_id();
            let speed = WEAPON_PROJ_SPEED[req.weapon as usize];
            let vel = if speed > 0.0 {
                Point::polar(speed, req.angle) + req.ship_vel
            } else {
                Point::default()
            };
            let projectile = Projectile {
                id,
                owner: req.owner,
                team: req.team,
                weapon: req.weapon,
                pos: req.pos,
                vel,
                life_remaining_ms: WEAPON_PROJ_LIFE_MS[req.weapon as usize] as i32,
            };
            self.grid.borrow_mut().insert(
                id,
                TypeMask::BULLET,
                Rect::around(req.pos, 4.0),
                None,
            );
            self.projectiles.borrow_mut().push(projectile);
        }
    }

    fn step_projectiles(&mut self, dt: u32) {
        let mut kills: Vec<(u32, String, i32, Point)> = Vec::new();
        let mut explosions: Vec<Point> = Vec::new();
        {
            let mut projectiles = self.projectiles.borrow_mut();
            let mut ships = self.ships.borrow_mut();
            let mut teleporters = self.teleporters.borrow_mut();
            let mut grid = self.grid.borrow_mut();

            for p in projectiles.iter_mut() {
                if p.life_remaining_ms <= 0 {
                    continue;
                }
                p.life_remaining_ms -= dt as i32;
                let new_pos = p.pos + p.vel * dt as f32;

                // Walls stop shots dead.
                if !grid.point_can_see_point(p.pos, new_pos) {
                    p.life_remaining_ms = 0;
                    continue;
                }

                // Closest ship struck along the sweep.
                let mut hit: Option<(f32, u32)> = None;
                let d = new_pos - p.pos;
                let len_sq = d.len_squared();
                for ship in ships.values() {
                    if ship.id == p.owner || ship.exploded {
                        continue;
                    }
                    let t = if len_sq <= f32::EPSILON {
                        0.0
                    } else {
                        ((ship.pos - p.pos).dot(d) / len_sq).clamp(0.0, 1.0)
                    };
                    let closest = p.pos + d * t;
                    if closest.distance_to(ship.pos) <= ship.radius
                        && hit.map(|(bt, _)| t < bt).unwrap_or(true)
                    {
                        hit = Some((t, ship.id));
                    }
                }
                if let Some((_, ship_id)) = hit {
                    let ship = ships.get_mut(&ship_id).unwrap();
                    if ship.apply_damage(WEAPON_DAMAGE[p.weapon as usize]) {
                        kills.push((ship.id, ship.name.clone(), ship.team, ship.pos));
                    }
                    p.life_remaining_ms = 0;
                    continue;
                }

                // Engineered teleporters block and soak shots.
                let mut absorbed = false;
                for tp in teleporters.iter_mut() {
                    if !tp.collides_with_projectile() {
                        continue;
                    }
                    let t = if len_sq <= f32::EPSILON {
                        0.0
                    } else {
                        ((tp.entry - p.pos).dot(d) / len_sq).clamp(0.0, 1.0)
                    };
                    let closest = p.pos + d * t;
                    if closest.distance_to(tp.entry) <= TELEPORTER_RADIUS / 2.0 {
                        if tp.damage(WEAPON_DAMAGE[p.weapon as usize]) {
                            explosions.push(tp.entry);
                        }
                        p.life_remaining_ms = 0;
                        absorbed = true;
                        break;
                    }
                }
                if absorbed {
                    continue;
                }

                p.pos = new_pos;
                grid.update_extent(p.id, Rect::around(p.pos, 4.0));
            }

            projectiles.retain(|p| {
                if p.life_remaining_ms <= 0 {
                    grid.remove(p.id);
                    false
                } else {
                    true
                }
            });
        }

        for pos in explosions {
            self.effects.push(Effect::Explosion { pos });
        }
        for (id, name, team, pos) in kills {
            self.effects.push(Effect::ShipExplosion { ship: id, pos });
            self.fire_event(
                EventType::ShipKilled,
                None,
                &EventPayload::Ship {
                    id,
                    name,
                    team,
                    pos,
                    alive: false,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::level::{rect_barrier, TeleporterSpec};

    fn test_config() -> HostConfig {
        HostConfig::default()
    }

    fn open_level() -> LevelSpec {
        let mut level = LevelSpec::new(Rect::new(
            Point::new(0.0, 0.0),
            Point::new(1000.0, 1000.0),
        ));
        level.teams.push(TeamSpec {
            spawn_points: vec![Point::new(100.0, 100.0)],
        });
        level
    }

    #[test]
    fn test_new_game_builds_navmesh() {
        let game = Game::new(open_level(), test_config()).unwrap();
        assert!(game.bots_enabled());
        assert!(!game.zones().is_empty());
        assert_eq!(game.game_time(), 0);
        assert!(game.robot_ids().is_empty());
    }

    #[test]
    fn test_disabled_generator_disables_bots() {
        let mut config = test_config();
        config.generator_mode = GeneratorMode::Disabled;
        let mut game = Game::new(open_level(), config).unwrap();
        assert!(!game.bots_enabled());
        let err = game.add_robot_source(0, "b.lua", "", vec![]).unwrap_err();
        assert!(matches!(err, BotError::BotsDisabled));
    }

    #[test]
    fn test_add_robot_and_drive() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let id = game
            .add_robot_source(
                0,
                "driver.lua",
                r#"
                function getName() return "Driver" end
                function onTick(dt)
                    set_thrust(1.0, 0)
                end
                "#,
                vec![],
            )
            .unwrap();
        let start = game.ships().borrow()[&id].pos;
        for _ in 0..5 {
            game.tick(32);
        }
        let end = game.ships().borrow()[&id].pos;
        assert!(end.x > start.x + 100.0, "bot did not move: {start:?} -> {end:?}");
        assert_eq!(end.y, start.y);
        assert_eq!(game.ships().borrow()[&id].name, "Driver");
        assert_eq!(game.game_time(), 160);
    }

    #[test]
    fn test_duplicate_names_get_suffixes() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let src = r#"function getName() return "Twin" end"#;
        let a = game.add_robot_source(0, "a.lua", src, vec![]).unwrap();
        let b = game.add_robot_source(0, "b.lua", src, vec![]).unwrap();
        assert_eq!(game.ships().borrow()[&a].name, "Twin");
        assert_eq!(game.ships().borrow()[&b].name, "Twin.1");
    }

    #[test]
    fn test_script_runtime_error_removes_bot() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let id = game
            .add_robot_source(
                0,
                "crash.lua",
                "function onTick(dt) error('boom') end",
                vec![],
            )
            .unwrap();
        assert_eq!(game.robot_ids(), vec![id]);
        game.tick(32);
        assert!(game.robot_ids().is_empty());
        assert!(game.ships().borrow().get(&id).is_none());
    }

    #[test]
    fn test_load_error_rejected() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let err = game
            .add_robot_source(0, "broken.lua", "this is not lua(", vec![])
            .unwrap_err();
        assert!(matches!(err, BotError::LoadError { .. }));
        assert!(game.robot_ids().is_empty());
        assert!(game.ships().borrow().is_empty());
    }

    #[test]
    fn test_missing_bot_file() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let err = game
            .add_robot_file(0, "no_such_bot.lua", vec![])
            .unwrap_err();
        assert!(matches!(err, BotError::FileNotFound(_)));
    }

    #[test]
    fn test_runaway_script_is_caught() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        game.add_robot_source(
            0,
            "spin.lua",
            "function onTick(dt) while true do end end",
            vec![],
        )
        .unwrap();
        // Must terminate rather than hang; the offender is removed.
        game.tick(32);
        assert!(game.robot_ids().is_empty());
    }

    #[test]
    fn test_chat_reaches_subscriber_not_sender() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let talker = game
            .add_robot_source(
                0,
                "talker.lua",
                r#"
                function main() subscribe(MsgReceivedEvent) end
                sent = false
                function onTick(dt)
                    if not sent then global_msg("hi there"); sent = true end
                end
                function onMsgReceived(msg, player, global)
                    print("talker-got", msg)
                end
                "#,
                vec![],
            )
            .unwrap();
        let listener = game
            .add_robot_source(
                0,
                "listener.lua",
                r#"
                function main() subscribe(MsgReceivedEvent) end
                function onMsgReceived(msg, player, global)
                    print("heard", msg, player.name, global)
                end
                "#,
                vec![],
            )
            .unwrap();

        game.tick(32);
        let heard = game.robot_output(listener);
        assert_eq!(heard.len(), 1);
        assert!(heard[0].starts_with("heard\thi there"));
        assert!(heard[0].contains("true"));
        // The sender gets nothing back.
        assert!(game.robot_output(talker).is_empty());
        assert_eq!(game.chat_log.len(), 1);
        assert_eq!(game.chat_log[0].text, "hi there");
    }

    #[test]
    fn test_fire_damages_other_ship() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let shooter = game
            .add_robot_source(
                0,
                "shooter.lua",
                "function onTick(dt) set_angle(0); fire() end",
                vec![],
            )
            .unwrap();
        let target = game
            .add_robot_source(1, "dummy.lua", "", vec![])
            .unwrap();
        {
            let mut ships = game.ships().borrow_mut();
            ships.get_mut(&shooter).unwrap().pos = Point::new(100.0, 100.0);
            ships.get_mut(&target).unwrap().pos = Point::new(260.0, 100.0);
        }
        for _ in 0..20 {
            game.tick(32);
        }
        let health = game.ships().borrow()[&target].health;
        assert!(health < SHIP_MAX_HEALTH, "target took no damage");
    }

    #[test]
    fn test_killed_robot_respawns() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let id = game.add_robot_source(0, "victim.lua", "", vec![]).unwrap();
        game.ships().borrow_mut().get_mut(&id).unwrap().kill();
        assert!(game.ships().borrow()[&id].exploded);
        let mut ticks = 0;
        while game.ships().borrow()[&id].exploded && ticks < 200 {
            game.tick(32);
            ticks += 1;
        }
        let ships = game.ships().borrow();
        assert!(!ships[&id].exploded, "bot never respawned");
        assert_eq!(ships[&id].health, SHIP_MAX_HEALTH);
        assert_eq!(ships[&id].pos, Point::new(100.0, 100.0));
    }

    #[test]
    fn test_teleporter_moves_bot_and_emits_effect() {
        let mut level = open_level();
        level.teleporters.push(TeleporterSpec {
            entry: Point::new(100.0, 100.0),
            destinations: vec![Point::new(900.0, 900.0)],
            delay_ms: Some(100),
            cooldown_ms: Some(100),
            engineered: false,
        });
        let mut game = Game::new(level, test_config()).unwrap();
        let id = game.add_robot_source(0, "rider.lua", "", vec![]).unwrap();
        // Spawn point sits on the pad.
        game.tick(32);
        let pos = game.ships().borrow()[&id].pos;
        assert!(pos.distance_to(Point::new(900.0, 900.0)) < 80.0, "pos {pos:?}");
        let effects = game.drain_effects();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Teleport { ship, .. } if *ship == id)));
    }

    #[test]
    fn test_wall_blocks_movement() {
        let mut level = open_level();
        level.barriers.push(rect_barrier(200.0, 0.0, 260.0, 1000.0));
        let mut game = Game::new(level, test_config()).unwrap();
        let id = game
            .add_robot_source(
                0,
                "rammer.lua",
                "function onTick(dt) set_thrust(1.0, 0) end",
                vec![],
            )
            .unwrap();
        for _ in 0..40 {
            game.tick(32);
        }
        let pos = game.ships().borrow()[&id].pos;
        assert!(pos.x < 200.0, "ship tunneled through the wall: {pos:?}");
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        game.add_robot_source(0, "s.lua", "", vec![]).unwrap();
        let snap = game.snapshot();
        assert_eq!(snap.ships.len(), 1);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"zone_count\""));
    }

    #[test]
    fn test_remove_robot_cleans_up() {
        let mut game = Game::new(open_level(), test_config()).unwrap();
        let id = game
            .add_robot_source(0, "leaver.lua", "function main() subscribe(MsgReceivedEvent) end", vec![])
            .unwrap();
        game.remove_robot(id);
        assert!(game.robot_ids().is_empty());
        assert!(game.ships().borrow().is_empty());
        assert!(!game
            .events
            .borrow()
            .is_subscribed(id, EventType::MsgReceived));
    }
}
