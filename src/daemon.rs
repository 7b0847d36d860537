//! Daemon lifecycle.
//!
//! Startup: connect the sensor, open the log, bind the socket, spawn the
//! multiplexer and the listener, then wait for SIGINT/SIGTERM.
//!
//! Shutdown (on a signal or when sampling fails): stop the listener, which
//! unlinks the socket, then stop the multiplexer, letting an in-flight
//! sample finish, then flush and close the log and disconnect the sensor.
//! Startup failures release whatever was already acquired in reverse
//! order.

use std::future::Future;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::DaemonError;
use crate::listener::DemandListener;
use crate::multiplexer::{Multiplexer, MultiplexerStats};
use crate::sensor::SensorHandle;
use crate::shutdown;
use crate::sink::LogSink;

/// Capacity of the demand request channel. One slot keeps the queue
/// close to a rendezvous while preserving per-connection order.
const REQUEST_CHANNEL_CAPACITY: usize = 1;

/// Run the daemon with the sensor named in `config` until SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<MultiplexerStats, DaemonError> {
    let sensor = config.sensor.open();
    run_with_sensor(config, sensor, wait_for_termination()).await
}

/// Run the daemon with a caller-supplied sensor until `shutdown` resolves
/// or sampling fails.
///
/// Returns the multiplexer's counters on clean shutdown.
pub async fn run_with_sensor<S, F>(
    config: Config,
    mut sensor: S,
    shutdown: F,
) -> Result<MultiplexerStats, DaemonError>
where
    S: SensorHandle + 'static,
    F: Future<Output = ()>,
{
    info!(sensor = %sensor.name(), "Connecting sensor");
    sensor.connect().map_err(DaemonError::SensorConnect)?;

    let sink = match LogSink::open(&config.log_path) {
        Ok(sink) => sink,
        Err(e) => {
            if let Err(de) = sensor.disconnect() {
                warn!(error = %de, "Failed to disconnect sensor after startup failure");
            }
            return Err(DaemonError::LogOpen(e));
        }
    };
    info!(path = %config.log_path.display(), "Log opened");

    let mut mux = Multiplexer::new(sensor, sink, config.period);

    let listener = match DemandListener::bind(&config.socket_path, config.io_timeout) {
        Ok(listener) => listener,
        Err(e) => {
            if let Err(ce) = mux.close() {
                warn!(error = %ce, "Failed to release resources after startup failure");
            }
            return Err(DaemonError::Bind(e));
        }
    };

    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let (listener_stop, listener_signal) = shutdown::channel();
    let (mux_stop, mux_signal) = shutdown::channel();

    let mut mux_handle = tokio::spawn(async move {
        let result = mux.run(requests_rx, mux_signal).await;
        (mux, result)
    });
    let listener_handle = tokio::spawn(listener.serve(requests_tx, listener_signal));

    info!(
        period_secs = config.period.as_secs_f64(),
        socket = %config.socket_path.display(),
        "Moisture daemon running"
    );

    tokio::pin!(shutdown);
    let finished_early = tokio::select! {
        _ = &mut shutdown => {
            info!("Shutdown requested, stopping...");
            None
        }
        joined = &mut mux_handle => {
            warn!("Multiplexer stopped on its own, shutting down");
            Some(joined)
        }
    };

    // Stop accepting first so no client connects to a daemon that will
    // never answer.
    listener_stop.trigger();
    match listener_handle.await {
        Ok(accepted) => info!(accepted, "Demand listener shut down"),
        Err(e) => warn!(error = %e, "Demand listener task failed"),
    }

    mux_stop.trigger();
    let joined = match finished_early {
        Some(joined) => joined,
        None => mux_handle.await,
    };
    let (mut mux, run_result) = joined.map_err(|e| DaemonError::Task(e.to_string()))?;

    let stats = mux.stats();
    let close_result = mux.close();

    if let Err(e) = run_result {
        if let Err(ce) = &close_result {
            warn!(error = %ce, "Failed to release resources after sampling failure");
        }
        return Err(DaemonError::Sampling(e));
    }
    close_result.map_err(DaemonError::Close)?;

    info!(
        ticks = stats.ticks,
        demands = stats.demands,
        "Moisture daemon stopped"
    );
    Ok(stats)
}

/// Resolve on SIGINT or SIGTERM.
///
/// Handlers are installed on first poll. If the SIGINT handler cannot be
/// installed this resolves immediately, which shuts the daemon down.
pub async fn wait_for_termination() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            None
        }
    };
    let sigterm_recv = async {
        match sigterm.as_mut() {
            Some(sigterm) => {
                sigterm.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT"),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        },
        _ = sigterm_recv => info!("Received SIGTERM"),
    }
}
