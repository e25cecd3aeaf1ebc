//! resp-bench: a PING load generator for RESP servers
//!
//! Opens a fixed number of connections to a Redis-compatible server, sends
//! `PING` on each of them one request at a time until the total request
//! budget is spent, then prints aggregate throughput.
//!
//! Features:
//! - Even split of the request budget across clients
//! - Worker threads or tokio tasks
//! - Configuration via CLI arguments or TOML file

mod config;
mod dispatcher;
mod protocol;
mod worker;

use clap::CommandFactory;
use config::{CliArgs, Config};
use std::io::{self, IsTerminal, Write};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // Initialize logging
    if let Some(ref config) = config {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(io::stdout().is_terminal())
            .with_writer(io::stdout)
            .init();
    }

    // Not locked: worker threads log to stdout while the run is in progress.
    app(config, &mut io::stdout())?;

    Ok(())
}

/// Run with a validated config, or print usage when there is none.
fn app<W: Write>(config: Option<Config>, out: &mut W) -> io::Result<()> {
    let Some(config) = config else {
        return CliArgs::command().write_help(out);
    };

    let report = dispatcher::run(&config);
    writeln!(out, "{report}")
}
