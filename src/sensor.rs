// IMU attitude input for the balance loop
//
// The IMU itself lives in the hardware process; samples arrive on the bus and
// land in a shared cell the control thread polls.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::IMU_STALE_AFTER;
use crate::messages::ImuSample;

/// Error types for attitude sensing
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("No IMU sample received yet")]
    NoSample,

    #[error("IMU sample is stale ({age:?} old)")]
    Stale { age: Duration },
}

/// Source of body attitude in degrees
pub trait AttitudeSensor: Send {
    /// Current `(roll, pitch, yaw)`
    fn attitude(&mut self) -> Result<(f64, f64, f64), SensorError>;

    /// Take the current reading as the level reference
    fn zero(&mut self) -> Result<(), SensorError>;
}

#[derive(Debug, Default)]
struct ImuCell {
    latest: Option<(ImuSample, Instant)>,
    bias: ImuSample,
}

/// Latest IMU sample from the bus, shared between the bridge and the control thread
#[derive(Debug, Clone)]
pub struct SharedImu {
    cell: Arc<Mutex<ImuCell>>,
    max_age: Duration,
}

impl Default for SharedImu {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedImu {
    pub fn new() -> Self {
        Self::with_max_age(IMU_STALE_AFTER)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            cell: Arc::new(Mutex::new(ImuCell::default())),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ImuCell> {
        self.cell.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a fresh sample
    pub fn update(&self, sample: ImuSample) {
        self.lock().latest = Some((sample, Instant::now()));
    }

    fn fresh_sample(&self, cell: &ImuCell) -> Result<ImuSample, SensorError> {
        let (sample, received_at) = cell.latest.ok_or(SensorError::NoSample)?;
        let age = received_at.elapsed();
        if age > self.max_age {
            return Err(SensorError::Stale { age });
        }
        Ok(sample)
    }
}

impl AttitudeSensor for SharedImu {
    fn attitude(&mut self) -> Result<(f64, f64, f64), SensorError> {
        let cell = self.lock();
        let sample = self.fresh_sample(&cell)?;
        Ok((
            sample.roll - cell.bias.roll,
            sample.pitch - cell.bias.pitch,
            sample.yaw - cell.bias.yaw,
        ))
    }

    fn zero(&mut self) -> Result<(), SensorError> {
        let mut cell = self.lock();
        let sample = self.fresh_sample(&cell)?;
        info!(
            "IMU re-zeroed at roll {:.2}, pitch {:.2}, yaw {:.2}",
            sample.roll, sample.pitch, sample.yaw
        );
        cell.bias = sample;
        Ok(())
    }
}

/// Replays a fixed list of readings; the last one repeats
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    readings: VecDeque<(f64, f64, f64)>,
    last: Option<(f64, f64, f64)>,
}

impl ScriptedSensor {
    pub fn new(readings: impl IntoIterator<Item = (f64, f64, f64)>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            ..Default::default()
        }
    }
}

impl AttitudeSensor for ScriptedSensor {
    fn attitude(&mut self) -> Result<(f64, f64, f64), SensorError> {
        if let Some(next) = self.readings.pop_front() {
            self.last = Some(next);
        }
        let reading = self.last.ok_or(SensorError::NoSample)?;
        debug!("scripted attitude {:?}", reading);
        Ok(reading)
    }

    fn zero(&mut self) -> Result<(), SensorError> {
        debug!("scripted sensor zeroed");
        Ok(())
    }
}
