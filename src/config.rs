//! Configuration module for the moisture daemon.
//!
//! Configuration is read once at startup from command line flags (each of
//! which may also come from a `MOISTURED_*` environment variable) and is
//! immutable afterwards. The tick period is resolved here into a single
//! [`Duration`] so nothing downstream multiplies units.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::sensor::SensorSpec;

/// Default path of the CSV log
pub const DEFAULT_TABLE_PATH: &str = "data.csv";

/// Default tick magnitude
pub const DEFAULT_INTERVAL: u64 = 12;

/// Default tick unit
pub const DEFAULT_QUANTITY: &str = "h";

/// Well-known path of the on-demand socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/moisture.sock";

/// Default symbolic sensor name
pub const DEFAULT_SENSOR: &str = "sim:DracaenaMoisture";

/// Default per-connection I/O timeout in milliseconds
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 5_000;

/// Longest accepted tick period (ten years)
pub const MAX_PERIOD: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Command line interface of `moistured`.
#[derive(Parser, Debug, Clone)]
#[command(name = "moistured")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to table csv file
    #[arg(long = "table", env = "MOISTURED_TABLE", value_name = "PATH", default_value = DEFAULT_TABLE_PATH)]
    pub table: PathBuf,

    /// Tick time interval numeric part
    #[arg(long = "int", env = "MOISTURED_INT", value_name = "N", default_value_t = DEFAULT_INTERVAL)]
    pub interval: u64,

    /// Tick time interval quantity (h/m/s)
    #[arg(long = "qty", env = "MOISTURED_QTY", value_name = "h|m|s", default_value = DEFAULT_QUANTITY)]
    pub quantity: String,

    /// Path of the on-demand unix socket
    #[arg(long = "socket", env = "MOISTURED_SOCKET", value_name = "PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Sensor to sample (sim:<name> or file:<path>)
    #[arg(long = "sensor", env = "MOISTURED_SENSOR", value_name = "SPEC", default_value = DEFAULT_SENSOR)]
    pub sensor: String,

    /// Timeout for reads, writes and replies on a client connection
    #[arg(long = "io-timeout-ms", env = "MOISTURED_IO_TIMEOUT_MS", value_name = "MS", default_value_t = DEFAULT_IO_TIMEOUT_MS)]
    pub io_timeout_ms: u64,
}

/// Unit of the tick period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    /// Length of one unit.
    pub fn unit_duration(self) -> Duration {
        match self {
            TimeUnit::Hours => Duration::from_secs(3600),
            TimeUnit::Minutes => Duration::from_secs(60),
            TimeUnit::Seconds => Duration::from_secs(1),
        }
    }

    /// `magnitude` units as a duration, or `None` on overflow.
    pub fn times(self, magnitude: u64) -> Option<Duration> {
        let secs = self.unit_duration().as_secs().checked_mul(magnitude)?;
        Some(Duration::from_secs(secs))
    }
}

impl FromStr for TimeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "h" => Ok(TimeUnit::Hours),
            "m" => Ok(TimeUnit::Minutes),
            "s" => Ok(TimeUnit::Seconds),
            other => Err(ConfigError::new(
                format!("wrong quantity '{}', expected h/m/s", other),
                "--qty",
            )),
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeUnit::Hours => write!(f, "h"),
            TimeUnit::Minutes => write!(f, "m"),
            TimeUnit::Seconds => write!(f, "s"),
        }
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the append-only CSV log
    pub log_path: PathBuf,

    /// Effective tick period
    pub period: Duration,

    /// Path of the on-demand socket
    pub socket_path: PathBuf,

    /// Which sensor driver to open
    pub sensor: SensorSpec,

    /// Bound on each client read, write and reply wait
    pub io_timeout: Duration,
}

/// Error type for configuration failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub flag: Option<String>,
}

impl ConfigError {
    fn new(message: impl Into<String>, flag: &str) -> Self {
        Self {
            message: message.into(),
            flag: Some(flag.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.flag {
            Some(flag) => write!(f, "Configuration error for {}: {}", flag, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Build a configuration with the given log path and period; other
    /// settings take their defaults.
    pub fn new(log_path: impl Into<PathBuf>, period: Duration) -> Self {
        Self {
            log_path: log_path.into(),
            period,
            ..Self::default()
        }
    }

    /// Relocate the on-demand socket.
    pub fn with_socket_path(mut self, socket_path: impl Into<PathBuf>) -> Self {
        self.socket_path = socket_path.into();
        self
    }

    /// Select a different sensor driver.
    pub fn with_sensor(mut self, sensor: SensorSpec) -> Self {
        self.sensor = sensor;
        self
    }

    /// Override the per-connection I/O timeout.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Resolve parsed command line flags into a configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `--qty` is not one of `h`, `m`, `s`
    /// - `--int` is zero or the resulting period exceeds [`MAX_PERIOD`]
    /// - `--sensor` is not a recognised sensor spec
    /// - `--io-timeout-ms` is zero
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let unit: TimeUnit = cli.quantity.parse()?;

        if cli.interval == 0 {
            return Err(ConfigError::new("interval must be greater than 0", "--int"));
        }

        let period = unit
            .times(cli.interval)
            .filter(|period| *period <= MAX_PERIOD)
            .ok_or_else(|| {
                ConfigError::new(
                    format!(
                        "interval {}{} exceeds maximum of {}h",
                        cli.interval,
                        unit,
                        MAX_PERIOD.as_secs() / 3600
                    ),
                    "--int",
                )
            })?;

        let sensor: SensorSpec = cli
            .sensor
            .parse()
            .map_err(|e| ConfigError::new(format!("{}", e), "--sensor"))?;

        if cli.io_timeout_ms == 0 {
            return Err(ConfigError::new(
                "timeout must be greater than 0",
                "--io-timeout-ms",
            ));
        }

        Ok(Self {
            log_path: cli.table.clone(),
            period,
            socket_path: cli.socket.clone(),
            sensor,
            io_timeout: Duration::from_millis(cli.io_timeout_ms),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_TABLE_PATH),
            period: Duration::from_secs(DEFAULT_INTERVAL * 3600),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            sensor: SensorSpec::Simulated("DracaenaMoisture".to_string()),
            io_timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
        }
    }
}
