mod api;
mod cli;
mod config;
mod error;
mod identity;
mod model;
mod progress;
mod storage;
mod summary;

use std::{io, process};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use config::Config;
use storage::Storage;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "TRB_LOG";

fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    init_tracing(&config);

    let Some(path) = config.database_path(cli.db.as_deref()) else {
        eprintln!("Could not determine home directory; pass --db or set TRB_DATABASE.");
        process::exit(1);
    };

    let storage = match Storage::new(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to initialize storage at {}: {e}", path.display());
            process::exit(1);
        }
    };

    if let Err(e) = cli::run(cli, &config, &storage) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Logs go to stderr so stdout carries only JSON.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(config.log.as_deref().unwrap_or("trb=warn")))
        .unwrap_or_else(|_| EnvFilter::new("trb=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
