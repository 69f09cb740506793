//! CLI for the statsd ring proxy.
//!
//! Provides commands for:
//! - Serving traffic (the default)
//! - Inspecting which node a metric key routes to

pub mod commands;
pub mod config;

pub use commands::Command;
pub use config::CliConfig;
