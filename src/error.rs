//! Top-level error type of the daemon.

use crate::config::ConfigError;
use crate::listener::ListenerError;
use crate::multiplexer::MultiplexerError;
use crate::sensor::SensorError;
use crate::sink::SinkError;

/// Exit code for invalid configuration
pub const EXIT_CONFIG: u8 = 2;

/// Exit code for every other fatal error
pub const EXIT_FAILURE: u8 = 1;

/// Fatal errors that end the daemon.
#[derive(Debug)]
pub enum DaemonError {
    /// Flags could not be resolved into a configuration
    Config(ConfigError),

    /// The sensor could not be connected at startup
    SensorConnect(SensorError),

    /// The CSV log could not be opened at startup
    LogOpen(SinkError),

    /// The on-demand socket could not be bound at startup
    Bind(ListenerError),

    /// Sampling stopped because the sensor or the log failed
    Sampling(MultiplexerError),

    /// Flushing the log or disconnecting the sensor failed at shutdown
    Close(MultiplexerError),

    /// A background task panicked or was cancelled
    Task(String),
}

impl DaemonError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::Config(_) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::Config(e) => write!(f, "{}", e),
            DaemonError::SensorConnect(e) => write!(f, "Failed to connect sensor: {}", e),
            DaemonError::LogOpen(e) => write!(f, "Failed to open log: {}", e),
            DaemonError::Bind(e) => write!(f, "Failed to start demand listener: {}", e),
            DaemonError::Sampling(e) => write!(f, "Sampling failed: {}", e),
            DaemonError::Close(e) => write!(f, "Failed to release resources: {}", e),
            DaemonError::Task(e) => write!(f, "Background task failed: {}", e),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Config(e) => Some(e),
            DaemonError::SensorConnect(e) => Some(e),
            DaemonError::LogOpen(e) => Some(e),
            DaemonError::Bind(e) => Some(e),
            DaemonError::Sampling(e) | DaemonError::Close(e) => Some(e),
            DaemonError::Task(_) => None,
        }
    }
}

impl From<ConfigError> for DaemonError {
    fn from(err: ConfigError) -> Self {
        DaemonError::Config(err)
    }
}
