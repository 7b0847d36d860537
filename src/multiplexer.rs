//! The sampling actor.
//!
//! The [`Multiplexer`] is the only owner of the sensor handle and the log
//! sink. Everything that wants a sample goes through it: the periodic
//! ticker directly, clients through the demand channel fed by the
//! listener. Samples are taken one at a time, off the async workers, and
//! each one is appended to the log (and flushed) before a demand reply is
//! sent.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MAX_PERIOD;
use crate::listener::DemandReceiver;
use crate::sensor::{SensorError, SensorHandle};
use crate::shutdown::ShutdownSignal;
use crate::sink::{LogSink, Reading, SinkError};

/// Shortest tick period a multiplexer will run with
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// What caused a sample to be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Demand,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Tick => write!(f, "tick"),
            Trigger::Demand => write!(f, "demand"),
        }
    }
}

/// Counters kept by the multiplexer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Samples taken because the ticker fired
    pub ticks: u64,

    /// Samples taken on client demand
    pub demands: u64,

    /// Demand replies whose client had already gone away
    pub replies_dropped: u64,
}

impl MultiplexerStats {
    /// Total samples taken and logged.
    pub fn samples(&self) -> u64 {
        self.ticks + self.demands
    }
}

/// Fatal sampling errors.
#[derive(Debug)]
pub enum MultiplexerError {
    /// The sensor failed to produce a sample
    Sensor(SensorError),

    /// The sample could not be logged
    Sink(SinkError),

    /// The blocking sampling job panicked or was cancelled
    Worker(String),
}

impl std::fmt::Display for MultiplexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MultiplexerError::Sensor(e) => write!(f, "Sensor read failed: {}", e),
            MultiplexerError::Sink(e) => write!(f, "Log append failed: {}", e),
            MultiplexerError::Worker(msg) => write!(f, "Sampling worker failed: {}", msg),
        }
    }
}

impl std::error::Error for MultiplexerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MultiplexerError::Sensor(e) => Some(e),
            MultiplexerError::Sink(e) => Some(e),
            MultiplexerError::Worker(_) => None,
        }
    }
}

impl From<SensorError> for MultiplexerError {
    fn from(err: SensorError) -> Self {
        MultiplexerError::Sensor(err)
    }
}

impl From<SinkError> for MultiplexerError {
    fn from(err: SinkError) -> Self {
        MultiplexerError::Sink(err)
    }
}

/// The sensor and the log, moved as one unit onto the blocking pool for
/// each sample.
struct Station<S> {
    sensor: S,
    sink: LogSink,
}

impl<S: SensorHandle> Station<S> {
    fn sample(&mut self) -> Result<Reading, MultiplexerError> {
        let value = self.sensor.read()?;
        let reading = Reading::now(value);
        self.sink.append(&reading)?;
        Ok(reading)
    }
}

/// Single owner of the sensor and the log.
///
/// Inside [`run`](Multiplexer::run) each read and append happens on the
/// blocking thread pool; the multiplexer task waits for it before looking
/// at the next trigger, so samples never overlap and a slow sensor does
/// not hold up a runtime worker.
pub struct Multiplexer<S: SensorHandle> {
    /// `None` only if a sampling job panicked and took the station with it
    station: Option<Station<S>>,
    period: Duration,
    stats: MultiplexerStats,
}

impl<S: SensorHandle> Multiplexer<S> {
    /// Take ownership of a connected sensor and an open sink.
    ///
    /// `period` is clamped to `[MIN_PERIOD, MAX_PERIOD]`.
    pub fn new(sensor: S, sink: LogSink, period: Duration) -> Self {
        let clamped = period.clamp(MIN_PERIOD, MAX_PERIOD);
        if clamped != period {
            warn!(
                requested_secs = period.as_secs_f64(),
                period_secs = clamped.as_secs_f64(),
                "Tick period out of range, clamped"
            );
        }
        Self {
            station: Some(Station { sensor, sink }),
            period: clamped,
            stats: MultiplexerStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> MultiplexerStats {
        self.stats
    }

    /// Read the sensor once, stamp the value and append it to the log,
    /// on the calling thread.
    ///
    /// The timestamp is taken after the read completes, so rows are in
    /// non-decreasing timestamp order.
    pub fn sample(&mut self, trigger: Trigger) -> Result<Reading, MultiplexerError> {
        let station = self.station.as_mut().ok_or_else(station_lost)?;
        let reading = station.sample()?;
        self.record(trigger, &reading);
        Ok(reading)
    }

    fn record(&mut self, trigger: Trigger, reading: &Reading) {
        match trigger {
            Trigger::Tick => self.stats.ticks += 1,
            Trigger::Demand => self.stats.demands += 1,
        }

        info!(
            %trigger,
            ts = reading.timestamp,
            value = reading.value,
            "Sample logged"
        );
    }

    /// Flush and close the log, then disconnect the sensor.
    ///
    /// Both steps are attempted even if the first fails; the first error
    /// is returned. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), MultiplexerError> {
        let Some(station) = self.station.as_mut() else {
            warn!("Sensor and log were lost with a failed sampling job");
            return Ok(());
        };

        let sink_result = station.sink.close();
        if sink_result.is_ok() {
            debug!(rows = station.sink.rows_written(), "Log flushed and closed");
        }

        let sensor_result = station.sensor.disconnect();
        if sensor_result.is_ok() {
            debug!(sensor = %station.sensor.name(), "Sensor disconnected");
        }

        sink_result?;
        sensor_result?;
        Ok(())
    }
}

impl<S: SensorHandle + 'static> Multiplexer<S> {
    /// Like [`sample`](Multiplexer::sample), but the read and the append
    /// run on the blocking thread pool.
    pub async fn sample_blocking(&mut self, trigger: Trigger) -> Result<Reading, MultiplexerError> {
        let mut station = self.station.take().ok_or_else(station_lost)?;
        let (station, result) = tokio::task::spawn_blocking(move || {
            let result = station.sample();
            (station, result)
        })
        .await
        .map_err(|e| MultiplexerError::Worker(e.to_string()))?;
        self.station = Some(station);

        let reading = result?;
        self.record(trigger, &reading);
        Ok(reading)
    }

    /// Serve ticks and demand requests until `shutdown` fires.
    ///
    /// Only one source is serviced per iteration and a sample is always
    /// finished (logged, and answered for demands) before the next source
    /// is looked at. Demands still queued at shutdown are dropped, which
    /// closes their clients' connections without a reply.
    ///
    /// # Errors
    ///
    /// Any sensor or log failure ends the loop and is returned; the caller
    /// is expected to shut the daemon down and then call [`close`].
    ///
    /// [`close`]: Multiplexer::close
    pub async fn run(
        &mut self,
        mut requests: DemandReceiver,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), MultiplexerError> {
        // First tick one full period after start, not immediately.
        let now = Instant::now();
        let first_tick = now.checked_add(self.period).unwrap_or(now);
        let mut ticker = interval_at(first_tick, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requests_open = true;

        info!(period_secs = self.period.as_secs_f64(), "Multiplexer started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    debug!("Multiplexer received shutdown");
                    break;
                }

                maybe_reply = requests.recv(), if requests_open => {
                    match maybe_reply {
                        Some(reply) => {
                            let reading = self.sample_blocking(Trigger::Demand).await?;
                            if reply.send(reading.value).is_err() {
                                self.stats.replies_dropped += 1;
                                warn!(value = reading.value, "Demand client went away before the reply");
                            }
                        }
                        None => {
                            debug!("Demand channel closed, continuing with ticks only");
                            requests_open = false;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.sample_blocking(Trigger::Tick).await?;
                }
            }
        }

        requests.close();
        let mut abandoned = 0u64;
        while requests.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            info!(abandoned, "Dropped queued demand requests at shutdown");
        }

        info!(
            ticks = self.stats.ticks,
            demands = self.stats.demands,
            "Multiplexer stopped"
        );
        Ok(())
    }
}

fn station_lost() -> MultiplexerError {
    MultiplexerError::Worker("sensor and log were lost with an earlier sampling job".to_string())
}
