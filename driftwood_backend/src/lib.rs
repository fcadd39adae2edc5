pub mod activitypub;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod database;
pub mod node;
pub mod telemetry;
pub mod utils;
