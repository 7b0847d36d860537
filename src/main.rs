//! moistured - Soil moisture sampling daemon
//!
//! Samples a moisture sensor on a fixed period, appends every reading to a
//! CSV log and answers on-demand reads over a local unix socket.
//!
//! ## Usage
//!
//! ```text
//! moistured [--table data.csv] [--int 12] [--qty h|m|s]
//!           [--socket /tmp/moisture.sock] [--sensor sim:DracaenaMoisture]
//! ```
//!
//! Every flag may also be set through the environment (`MOISTURED_TABLE`,
//! `MOISTURED_INT`, `MOISTURED_QTY`, ...). `RUST_LOG` controls the log
//! filter (default: info).
//!
//! Exit codes: 0 on clean shutdown (SIGINT/SIGTERM), 2 on invalid
//! configuration, 1 on any other fatal error.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use moistured::config::{Cli, Config};
use moistured::daemon;
use moistured::error::DaemonError;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let config = match Config::from_cli(&cli) {
        Ok(config) => {
            info!(
                log_path = %config.log_path.display(),
                period_secs = config.period.as_secs(),
                socket = %config.socket_path.display(),
                sensor = %config.sensor,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            let e = DaemonError::from(e);
            error!(error = %e, "Failed to load configuration");
            return ExitCode::from(e.exit_code());
        }
    };

    match daemon::run(config).await {
        Ok(stats) => {
            info!(samples = stats.samples(), "Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Moisture daemon failed");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
///
/// Output goes to stderr so configuration errors are reported there.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
