pub mod config;
pub mod events;
pub mod game;
pub mod geom;
pub mod level;
pub mod lua_api;
pub mod navmesh;
pub mod pathfinder;
pub mod polymesh;
pub mod robot;
pub mod ship;
pub mod spatial;
pub mod teleporter;
pub mod zone;
