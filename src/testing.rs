//! Test doubles shared by the unit tests of several modules.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::sensor::{SensorError, SensorHandle};

/// Shared counters of a [`FakeSensor`], kept by the test after the sensor
/// itself has been moved into the code under test.
#[derive(Clone, Default)]
pub struct FakeSensorProbe {
    reads: Arc<AtomicUsize>,
    in_read: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
}

impl FakeSensorProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of reads that started while another was still running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_reading(&self) -> bool {
        self.in_read.load(Ordering::SeqCst)
    }
}

/// Scripted sensor. Returns `values` in order, then repeats the last one.
pub struct FakeSensor {
    values: VecDeque<f64>,
    last: f64,
    delay: Duration,
    fail_on_read: Option<usize>,
    fail_connect: bool,
    probe: FakeSensorProbe,
}

impl FakeSensor {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            last: 0.0,
            delay: Duration::ZERO,
            fail_on_read: None,
            fail_connect: false,
            probe: FakeSensorProbe::default(),
        }
    }

    /// Block every read for `delay`, like a slow bus transaction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the `n`th read (1-based).
    pub fn failing_on_read(mut self, n: usize) -> Self {
        self.fail_on_read = Some(n);
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn probe(&self) -> FakeSensorProbe {
        self.probe.clone()
    }
}

impl SensorHandle for FakeSensor {
    fn name(&self) -> &str {
        "fake"
    }

    fn connect(&mut self) -> Result<(), SensorError> {
        if self.fail_connect {
            return Err(SensorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        self.probe.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<f64, SensorError> {
        if !self.probe.is_connected() {
            return Err(SensorError::NotConnected);
        }
        if self.probe.in_read.swap(true, Ordering::SeqCst) {
            self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let n = self.probe.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let result = if self.fail_on_read == Some(n) {
            Err(SensorError::Parse("garbage".to_string()))
        } else {
            if let Some(value) = self.values.pop_front() {
                self.last = value;
            }
            Ok(self.last)
        };
        self.probe.in_read.store(false, Ordering::SeqCst);
        result
    }

    fn disconnect(&mut self) -> Result<(), SensorError> {
        if self.probe.connected.swap(false, Ordering::SeqCst) {
            self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Unique path under the system temp directory.
pub fn temp_path(tag: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "moistured-{}-{}.{}",
        tag,
        uuid::Uuid::new_v4(),
        extension
    ))
}

/// Parse a CSV log into `(timestamp, value)` rows.
pub fn read_rows(path: &std::path::Path) -> Vec<(i64, f64)> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .map(|line| {
            let (ts, value) = line.split_once(',').expect("two fields per row");
            (ts.parse().expect("integer ts"), value.parse().expect("float value"))
        })
        .collect()
}
