//! Moisture Daemon Library
//!
//! This library provides the components of a soil-moisture sampling daemon:
//!
//! - **config**: Command line / environment configuration
//! - **sensor**: Sensor handle contract and bundled drivers
//! - **sink**: Append-only CSV log of readings
//! - **multiplexer**: The single task that owns the sensor and the log
//! - **listener**: On-demand sampling over a local unix socket
//! - **daemon**: Startup and orderly shutdown
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use moistured::config::Config;
//! use moistured::listener::request_sample;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Sample every 10 minutes into ./data.csv
//!     let config = Config::new("data.csv", Duration::from_secs(600));
//!     let socket = config.socket_path.clone();
//!
//!     tokio::spawn(moistured::daemon::run(config));
//!
//!     // Ask the daemon for a sample right now
//!     let value = request_sample(&socket, Duration::from_secs(5)).await;
//!     println!("moisture: {:?}", value);
//! }
//! ```

// Module declarations
pub mod config;
pub mod daemon;
pub mod error;
pub mod listener;
pub mod multiplexer;
pub mod sensor;
pub mod shutdown;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root for convenience
pub use config::{Cli, Config, ConfigError, TimeUnit};
pub use error::DaemonError;
pub use listener::{decode_reply, encode_reply, request_sample, DemandListener, ListenerError};
pub use multiplexer::{Multiplexer, MultiplexerError, MultiplexerStats, Trigger};
pub use sensor::{FileSensor, SensorError, SensorHandle, SensorSpec, SimulatedSensor};
pub use sink::{LogSink, Reading, SinkError};
