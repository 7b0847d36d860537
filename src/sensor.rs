//! Sensor access contract and bundled drivers.
//!
//! A [`SensorHandle`] follows the lifecycle
//! `created -> connected -> read* -> disconnected`. Handles are `&mut self`
//! throughout, so whoever owns the handle is the only one able to read it;
//! the multiplexer is that owner for the lifetime of the daemon.

use std::path::PathBuf;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Prefix selecting the simulated driver
const SIM_PREFIX: &str = "sim:";

/// Prefix selecting the file-backed driver
const FILE_PREFIX: &str = "file:";

/// Largest step the simulated moisture value takes between reads
const SIM_MAX_DRIFT: f64 = 0.01;

/// Errors raised by sensor drivers.
#[derive(Debug)]
pub enum SensorError {
    /// `read` was called outside `connect`..`disconnect`
    NotConnected,

    /// The underlying device could not be reached or read
    Io(std::io::Error),

    /// The device returned something that is not a number
    Parse(String),

    /// The symbolic sensor name is not recognised
    InvalidSpec(String),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::NotConnected => write!(f, "Sensor is not connected"),
            SensorError::Io(e) => write!(f, "Sensor I/O error: {}", e),
            SensorError::Parse(raw) => write!(f, "Sensor returned invalid sample '{}'", raw),
            SensorError::InvalidSpec(spec) => write!(
                f,
                "Unknown sensor '{}', expected {}<name> or {}<path>",
                spec, SIM_PREFIX, FILE_PREFIX
            ),
        }
    }
}

impl std::error::Error for SensorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SensorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SensorError {
    fn from(err: std::io::Error) -> Self {
        SensorError::Io(err)
    }
}

/// Opaque handle to one physical moisture sensor.
pub trait SensorHandle: Send {
    /// Symbolic name of the device, for logging.
    fn name(&self) -> &str;

    /// Open the device. Must succeed before the first `read`.
    fn connect(&mut self) -> Result<(), SensorError>;

    /// Take one sample.
    fn read(&mut self) -> Result<f64, SensorError>;

    /// Close the device. Calling it twice is a no-op.
    fn disconnect(&mut self) -> Result<(), SensorError>;
}

impl<S: SensorHandle + ?Sized> SensorHandle for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&mut self) -> Result<(), SensorError> {
        (**self).connect()
    }

    fn read(&mut self) -> Result<f64, SensorError> {
        (**self).read()
    }

    fn disconnect(&mut self) -> Result<(), SensorError> {
        (**self).disconnect()
    }
}

/// Symbolic sensor selection, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorSpec {
    /// `sim:<name>`: simulated moisture fraction
    Simulated(String),

    /// `file:<path>`: decimal value read from a file on every sample
    File(PathBuf),
}

impl SensorSpec {
    /// Construct the (not yet connected) handle this spec names.
    pub fn open(&self) -> Box<dyn SensorHandle> {
        match self {
            SensorSpec::Simulated(name) => Box::new(SimulatedSensor::new(name.clone())),
            SensorSpec::File(path) => Box::new(FileSensor::new(path.clone())),
        }
    }
}

impl FromStr for SensorSpec {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix(SIM_PREFIX).filter(|n| !n.is_empty()) {
            Ok(SensorSpec::Simulated(name.to_string()))
        } else if let Some(path) = s.strip_prefix(FILE_PREFIX).filter(|p| !p.is_empty()) {
            Ok(SensorSpec::File(PathBuf::from(path)))
        } else {
            Err(SensorError::InvalidSpec(s.to_string()))
        }
    }
}

impl std::fmt::Display for SensorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorSpec::Simulated(name) => write!(f, "{}{}", SIM_PREFIX, name),
            SensorSpec::File(path) => write!(f, "{}{}", FILE_PREFIX, path.display()),
        }
    }
}

/// Simulated soil moisture probe.
///
/// Produces a fraction in `[0.0, 1.0]` that drifts by a small random step
/// on every read, which is what a slowly drying pot looks like.
pub struct SimulatedSensor {
    name: String,
    connected: bool,
    value: f64,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rng(name, StdRng::from_entropy())
    }

    /// Deterministic sensor for reproducible runs.
    pub fn with_seed(name: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(name, StdRng::seed_from_u64(seed))
    }

    fn with_rng(name: impl Into<String>, mut rng: StdRng) -> Self {
        let value = rng.gen_range(0.3..0.7);
        Self {
            name: name.into(),
            connected: false,
            value,
            rng,
        }
    }
}

impl SensorHandle for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<(), SensorError> {
        debug!(sensor = %self.name, "Simulated sensor connected");
        self.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<f64, SensorError> {
        if !self.connected {
            return Err(SensorError::NotConnected);
        }
        let step = self.rng.gen_range(-SIM_MAX_DRIFT..=SIM_MAX_DRIFT);
        self.value = (self.value + step).clamp(0.0, 1.0);
        Ok(self.value)
    }

    fn disconnect(&mut self) -> Result<(), SensorError> {
        if self.connected {
            debug!(sensor = %self.name, "Simulated sensor disconnected");
        }
        self.connected = false;
        Ok(())
    }
}

/// Sensor exposed as a file holding one decimal value, such as a sysfs
/// attribute of an ADC driver.
pub struct FileSensor {
    path: PathBuf,
    name: String,
    connected: bool,
}

impl FileSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            path,
            name,
            connected: false,
        }
    }
}

impl SensorHandle for FileSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<(), SensorError> {
        // Fail at startup rather than on the first tick hours later.
        std::fs::File::open(&self.path)?;
        self.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Result<f64, SensorError> {
        if !self.connected {
            return Err(SensorError::NotConnected);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let trimmed = raw.trim();
        trimmed
            .parse::<f64>()
            .map_err(|_| SensorError::Parse(trimmed.to_string()))
    }

    fn disconnect(&mut self) -> Result<(), SensorError> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("moistured-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_spec_parsing() {
        assert_eq!(
            "sim:DracaenaMoisture".parse::<SensorSpec>().unwrap(),
            SensorSpec::Simulated("DracaenaMoisture".to_string())
        );
        assert_eq!(
            "file:/dev/shm/moisture".parse::<SensorSpec>().unwrap(),
            SensorSpec::File(PathBuf::from("/dev/shm/moisture"))
        );
        assert!(matches!(
            "DracaenaMoisture".parse::<SensorSpec>(),
            Err(SensorError::InvalidSpec(_))
        ));
        assert!("sim:".parse::<SensorSpec>().is_err());
        assert!("file:".parse::<SensorSpec>().is_err());
    }

    #[test]
    fn test_spec_display() {
        let spec = SensorSpec::Simulated("pot".to_string());
        assert_eq!(spec.to_string(), "sim:pot");
        assert_eq!(spec.to_string().parse::<SensorSpec>().unwrap(), spec);
    }

    #[test]
    fn test_simulated_lifecycle() {
        let mut sensor = SimulatedSensor::with_seed("pot", 7);
        assert!(matches!(sensor.read(), Err(SensorError::NotConnected)));

        sensor.connect().unwrap();
        for _ in 0..1000 {
            let value = sensor.read().unwrap();
            assert!((0.0..=1.0).contains(&value));
        }

        sensor.disconnect().unwrap();
        sensor.disconnect().unwrap();
        assert!(matches!(sensor.read(), Err(SensorError::NotConnected)));
    }

    #[test]
    fn test_simulated_drift_is_bounded() {
        let mut sensor = SimulatedSensor::with_seed("pot", 42);
        sensor.connect().unwrap();
        let mut previous = sensor.read().unwrap();
        for _ in 0..100 {
            let next = sensor.read().unwrap();
            assert!((next - previous).abs() <= SIM_MAX_DRIFT + f64::EPSILON);
            previous = next;
        }
    }

    #[test]
    fn test_file_sensor_reads_value() {
        let path = temp_path("file-sensor");
        std::fs::write(&path, "0.4375\n").unwrap();

        let mut sensor = SensorSpec::File(path.clone()).open();
        sensor.connect().unwrap();
        assert_eq!(sensor.read().unwrap(), 0.4375);

        std::fs::write(&path, "0.5").unwrap();
        assert_eq!(sensor.read().unwrap(), 0.5);

        std::fs::write(&path, "n/a").unwrap();
        assert!(matches!(sensor.read(), Err(SensorError::Parse(_))));

        sensor.disconnect().unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_sensor_missing_device() {
        let mut sensor = FileSensor::new(temp_path("missing"));
        assert!(matches!(sensor.connect(), Err(SensorError::Io(_))));
    }

    #[test]
    fn test_sensor_error_display() {
        assert_eq!(
            format!("{}", SensorError::NotConnected),
            "Sensor is not connected"
        );
        assert_eq!(
            format!("{}", SensorError::Parse("abc".to_string())),
            "Sensor returned invalid sample 'abc'"
        );
    }
}
