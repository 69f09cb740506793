//! CLI entry point for statsd-ring-proxy.

use clap::Parser;
use cli::CliConfig;
use tracing::error;

fn main() {
    let config = CliConfig::parse();
    config.init_logging();

    if let Err(e) = config.run() {
        error!("fatal error: {:#}", e);
        std::process::exit(1);
    }
}
