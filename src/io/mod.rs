//! Configuration handling.

mod config;

pub use config::{read_config, RunConfig, SystemConfig};
