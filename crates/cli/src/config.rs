//! Command-line flags shared by every command.

use crate::commands::Command;
use anyhow::{Context, Result};
use clap::Parser;
use proxy::ProxyConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// UDP statsd proxy routing metrics over a consistent-hash ring
#[derive(Parser, Debug)]
#[command(name = "statsd-ring-proxy")]
#[command(author, version, about, long_about = None)]
pub struct CliConfig {
    /// Configuration profile; loads `<config-dir>/<env>.json`
    #[arg(long, global = true, default_value = "config")]
    pub env: String,

    /// Directory holding the profile files
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl CliConfig {
    /// Installs the global tracing subscriber.
    pub fn init_logging(&self) {
        tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(&self.log_level)),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    /// Loads and validates the selected profile.
    pub fn load_proxy_config(&self) -> Result<ProxyConfig> {
        ProxyConfig::load(&self.config_dir, &self.env)
            .with_context(|| format!("cannot load profile '{}'", self.env))
    }

    /// Runs the selected command on a multi-threaded runtime.
    pub fn run(self) -> Result<()> {
        let command = self.command.clone().unwrap_or(Command::Serve);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("cannot start async runtime")?;
        runtime.block_on(command.execute(&self))
    }
}
