// Host configuration snapshot, loaded from environment variables and CLI
// flags at server start. The core only reads it; nothing here is persisted.

use std::path::PathBuf;

use crate::engine::navmesh::GeneratorMode;

/// Options recognized by the navigation/bot core.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Zone generator selection (0 disables bots, 6 is the full pipeline).
    pub generator_mode: GeneratorMode,
    /// Root for bot scripts referenced by level files.
    pub robot_dir: PathBuf,
    /// Root for the fixed helper scripts loaded before every bot.
    pub lua_dir: PathBuf,
    /// Root for level JSON files.
    pub level_dir: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            generator_mode: GeneratorMode::AggregatedPruned,
            robot_dir: PathBuf::from("scripts"),
            lua_dir: PathBuf::from("scripts"),
            level_dir: PathBuf::from("levels"),
        }
    }
}

impl HostConfig {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `SKIRMISH_ZONE_MODE` - bot zone generator mode 0..=6 (default 6)
    /// - `SKIRMISH_ROBOT_DIR` - bot script directory (default `scripts`)
    /// - `SKIRMISH_LUA_DIR` - helper script directory (default `scripts`)
    /// - `SKIRMISH_LEVEL_DIR` - level directory (default `levels`)
    ///
    /// CLI flags override the environment: `--zone-mode <N>`,
    /// `--robot-dir <DIR>`, `--lua-dir <DIR>`, `--level-dir <DIR>`.
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = HostConfig::default();

        let mode = Self::parse_cli_value(args, "--zone-mode")
            .or_else(|| env("SKIRMISH_ZONE_MODE"))
            .and_then(|v| v.parse::<u8>().ok())
            .map(GeneratorMode::from_u8)
            .unwrap_or(defaults.generator_mode);

        let dir = |flag: &str, key: &str, default: PathBuf| {
            Self::parse_cli_value(args, flag)
                .or_else(|| env(key))
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        HostConfig {
            generator_mode: mode,
            robot_dir: dir("--robot-dir", "SKIRMISH_ROBOT_DIR", defaults.robot_dir),
            lua_dir: dir("--lua-dir", "SKIRMISH_LUA_DIR", defaults.lua_dir),
            level_dir: dir("--level-dir", "SKIRMISH_LEVEL_DIR", defaults.level_dir),
        }
    }

    /// Parse a CLI flag value like `--zone-mode 6`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
