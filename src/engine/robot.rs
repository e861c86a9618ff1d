// Per-bot interpreter lifecycle: VM creation, script bootstrap, the tick
// entry point, and event delivery. The game loop installs the shared context
// before every call; a script error is contained to its own bot.

use std::path::{Path, PathBuf};

use mlua::Lua;
use thiserror::Error;
use tracing::warn;

use super::config::DEFAULT_BOT_NAME;
use super::lua_api;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("bot file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("script load error in {file}: {message}")]
    LoadError { file: String, message: String },
    #[error("script runtime error: {0}")]
    RuntimeError(String),
    #[error("bot support is disabled for this level")]
    BotsDisabled,
}

pub struct Robot {
    pub id: u32,
    pub team: i32,
    pub filename: String,
    pub args: Vec<String>,
    pub lua: Lua,
}

impl Robot {
    /// Create the VM and register the host API and constants. The script is
    /// loaded separately so the caller can install the game context first.
    pub fn new(id: u32, team: i32, filename: &str, args: Vec<String>) -> Result<Robot, BotError> {
        let lua = Lua::new();
        let load_err = |e: mlua::Error| BotError::LoadError {
            file: filename.to_string(),
            message: e.to_string(),
        };
        lua_api::register_constants(&lua).map_err(load_err)?;
        lua_api::register_functions(&lua).map_err(load_err)?;

        // Scripts receive their own filename plus any level-file arguments
        // through the global `args` table.
        (|| -> mlua::Result<()> {
            let args_table = lua.create_table()?;
            args_table.set(1, filename)?;
            for (i, a) in args.iter().enumerate() {
                args_table.set(i + 2, a.as_str())?;
            }
            lua.globals().set("args", args_table)
        })()
        .map_err(load_err)?;

        Ok(Robot {
            id,
            team,
            filename: filename.to_string(),
            args,
            lua,
        })
    }

    /// Load the fixed helper script, then the bot's own source. Both run at
    /// global scope, so top-level code may already call host functions.
    pub fn load(&self, helper_path: &Path, source: &str) -> Result<(), BotError> {
        let helper = std::fs::read_to_string(helper_path).map_err(|e| BotError::LoadError {
            file: helper_path.display().to_string(),
            message: e.to_string(),
        })?;
        self.lua
            .load(&helper)
            .set_name(helper_path.display().to_string())
            .exec()
            .map_err(|e| BotError::LoadError {
                file: helper_path.display().to_string(),
                message: e.to_string(),
            })?;
        self.lua
            .load(source)
            .set_name(self.filename.clone())
            .exec()
            .map_err(|e| BotError::LoadError {
                file: self.filename.clone(),
                message: e.to_string(),
            })
    }

    /// The script's chosen name, via `getName()`. The helper script provides
    /// a default; anything that fails falls back to the stock name.
    pub fn script_name(&self) -> String {
        let f: mlua::Result<mlua::Function> = self.lua.globals().get("getName");
        match f {
            Ok(f) => match f.call::<_, String>(()) {
                Ok(name) if !name.is_empty() => name,
                Ok(_) => DEFAULT_BOT_NAME.to_string(),
                Err(e) => {
                    warn!(bot = self.id, "error retrieving bot name: {e}");
                    DEFAULT_BOT_NAME.to_string()
                }
            },
            Err(_) => DEFAULT_BOT_NAME.to_string(),
        }
    }

    /// Run the script's one-time `main()` (through the helper trampoline).
    pub fn run_main(&self) -> mlua::Result<()> {
        let f: mlua::Function = self.lua.globals().get("_main")?;
        f.call(())
    }

    /// Per-tick entry point.
    pub fn on_tick(&self, dt_ms: u32) -> mlua::Result<()> {
        let f: mlua::Function = self.lua.globals().get("_onTick")?;
        f.call(dt_ms)
    }
}

/// Make `name` unique against the names already in play by appending a
/// numeric suffix.
pub fn make_unique_name(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == name) {
        return name.to_string();
    }
    for i in 1.. {
        let candidate = format!("{name}.{i}");
        if !taken.iter().any(|t| t == &candidate) {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELPERS: &str = "scripts/bot_helpers.lua";

    #[test]
    fn test_bootstrap_and_name() {
        let robot = Robot::new(1, 0, "namebot.lua", vec![]).unwrap();
        robot
            .load(Path::new(HELPERS), r#"function getName() return "Vera" end"#)
            .unwrap();
        assert_eq!(robot.script_name(), "Vera");
        robot.run_main().unwrap();
    }

    #[test]
    fn test_default_name_from_helper() {
        let robot = Robot::new(1, 0, "plain.lua", vec![]).unwrap();
        robot.load(Path::new(HELPERS), "-- no overrides").unwrap();
        assert_eq!(robot.script_name(), DEFAULT_BOT_NAME);
    }

    #[test]
    fn test_args_table() {
        let robot = Robot::new(1, 0, "argbot.lua", vec!["alpha".into(), "7".into()]).unwrap();
        robot
            .load(
                Path::new(HELPERS),
                "assert(args[1] == 'argbot.lua'); assert(args[2] == 'alpha'); assert(args[3] == '7')",
            )
            .unwrap();
    }

    #[test]
    fn test_syntax_error_is_load_error() {
        let robot = Robot::new(1, 0, "broken.lua", vec![]).unwrap();
        let err = robot
            .load(Path::new(HELPERS), "function oops( -- unterminated")
            .unwrap_err();
        assert!(matches!(err, BotError::LoadError { .. }));
    }

    #[test]
    fn test_missing_helper_file() {
        let robot = Robot::new(1, 0, "x.lua", vec![]).unwrap();
        let err = robot
            .load(Path::new("scripts/does_not_exist.lua"), "")
            .unwrap_err();
        assert!(matches!(err, BotError::LoadError { .. }));
    }

    #[test]
    fn test_make_unique_name() {
        let taken = vec!["Bot".to_string(), "Bot.1".to_string()];
        assert_eq!(make_unique_name("Fresh", &taken), "Fresh");
        assert_eq!(make_unique_name("Bot", &taken), "Bot.2");
    }
}
