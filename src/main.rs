// Headless match runner: build a game from a level file (or the built-in
// demo arena), drive it for a fixed number of ticks, and log a summary.

use skirmish_backend::config::HostConfig;
use skirmish_backend::engine::game::Game;
use skirmish_backend::engine::geom::{Point, Rect};
use skirmish_backend::engine::level::{rect_barrier, BotSpec, LevelSpec, TeamSpec, TeleporterSpec};

const TICK_MS: u32 = 32;

fn demo_level() -> LevelSpec {
    let mut level = LevelSpec::new(Rect::new(Point::new(0.0, 0.0), Point::new(2000.0, 1200.0)));
    level.barriers.push(rect_barrier(600.0, 0.0, 700.0, 800.0));
    level.barriers.push(rect_barrier(1300.0, 400.0, 1400.0, 1200.0));
    level.teleporters.push(TeleporterSpec {
        entry: Point::new(150.0, 1050.0),
        destinations: vec![Point::new(1850.0, 150.0)],
        delay_ms: None,
        cooldown_ms: None,
        engineered: false,
    });
    level.teams.push(TeamSpec {
        spawn_points: vec![Point::new(150.0, 150.0), Point::new(300.0, 150.0)],
    });
    level.teams.push(TeamSpec {
        spawn_points: vec![Point::new(1850.0, 1050.0), Point::new(1700.0, 1050.0)],
    });
    level.bots.push(BotSpec {
        team: 0,
        script: "wanderer.lua".into(),
        args: vec![],
    });
    level.bots.push(BotSpec {
        team: 1,
        script: "wanderer.lua".into(),
        args: vec![],
    });
    level
}

fn main() {
    tracing_subscriber::fmt::init();

    let config = HostConfig::load();
    let args: Vec<String> = std::env::args().collect();

    let level = match args
        .windows(2)
        .find(|p| p[0] == "--level")
        .map(|p| p[1].clone())
    {
        Some(name) => {
            let path = config.level_dir.join(&name);
            let json = match std::fs::read_to_string(&path) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("cannot read level {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            match LevelSpec::from_json(&json) {
                Ok(level) => level,
                Err(e) => {
                    tracing::error!("cannot parse level {}: {e}", path.display());
                    std::process::exit(1);
                }
            }
        }
        None => demo_level(),
    };

    let ticks: u64 = args
        .windows(2)
        .find(|p| p[0] == "--ticks")
        .and_then(|p| p[1].parse().ok())
        .unwrap_or(2000);

    let mut game = match Game::new(level, config) {
        Ok(game) => game,
        Err(e) => {
            tracing::error!("failed to start game: {e}");
            std::process::exit(1);
        }
    };

    for tick in 0..ticks {
        game.tick(TICK_MS);
        if tick % 300 == 299 {
            let snap = game.snapshot();
            for ship in &snap.ships {
                tracing::info!(
                    name = ship.name.as_str(),
                    x = ship.x,
                    y = ship.y,
                    health = ship.health,
                    alive = ship.alive,
                    "ship"
                );
            }
        }
        for id in game.robot_ids() {
            for line in game.robot_output(id) {
                tracing::info!(bot = id, "script: {line}");
            }
        }
    }

    let snap = game.snapshot();
    tracing::info!(
        game_time = snap.game_time,
        ships = snap.ships.len(),
        zones = snap.zone_count,
        chat_lines = game.chat_log.len(),
        "match finished"
    );
}
