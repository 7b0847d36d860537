//! Append-only CSV log of moisture readings.
//!
//! Each row is `<unix seconds>,<value>` with no header. Rows are formatted
//! in full before they touch the writer and the writer is flushed after
//! every row, so a successful [`LogSink::append`] means the row has been
//! handed to the OS.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

/// Permission bits of a newly created log file
pub const LOG_FILE_MODE: u32 = 0o660;

/// A single timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Seconds since the Unix epoch
    pub timestamp: i64,

    /// Moisture value as returned by the sensor
    pub value: f64,
}

impl Reading {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Stamp a value that was just sampled with the current wall time.
    pub fn now(value: f64) -> Self {
        Self::new(Utc::now().timestamp(), value)
    }

    /// The CSV row for this reading, including the record terminator.
    pub fn to_csv_row(&self) -> String {
        format!("{},{:.6}\n", self.timestamp, self.value)
    }
}

/// Errors that can occur while writing the log.
#[derive(Debug)]
pub enum SinkError {
    /// The sink has already been closed
    Closed,

    /// Opening, writing or flushing the file failed
    Io(std::io::Error),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Closed => write!(f, "Log sink has been closed"),
            SinkError::Io(e) => write!(f, "Log I/O error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(e) => Some(e),
            SinkError::Closed => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

/// Append-only CSV file of readings.
pub struct LogSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows_written: u64,
}

impl LogSink {
    /// Open `path` for appending, creating it with mode `0660` if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(LOG_FILE_MODE)
            .open(&path)?;

        debug!(path = %path.display(), "Log sink opened");

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            rows_written: 0,
        })
    }

    /// Append one row and flush it.
    ///
    /// On error the sink is in an unspecified state and should be closed.
    pub fn append(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let row = reading.to_csv_row();
        writer.write_all(row.as_bytes())?;
        writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flush and close the file. Subsequent calls do nothing.
    pub fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(
                path = %self.path.display(),
                rows_written = self.rows_written,
                "Log sink closed"
            );
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended since the sink was opened.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, path = %self.path.display(), "Failed to flush log sink on drop");
        }
    }
}
