// Servo sink implementations
//
// - BusServoSink: batches one update into a frame and publishes it as JSON
// - LogSink: dry-run sink that only logs
// - RecordingSink: keeps every call in memory for diagnostics

use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use zenoh::Wait;
use zenoh::pubsub::Publisher;

use super::pca9685::{FULL_OFF, PwmChannel, duty_ticks, relax_channels};
use super::{ActuationError, ServoSink};
use crate::messages::{ServoMessage, ServoTarget};

/// Publishes servo frames on the actuation topic
pub struct BusServoSink {
    publisher: Publisher<'static>,
    pending: Vec<ServoTarget>,
}

impl BusServoSink {
    pub fn new(publisher: Publisher<'static>) -> Self {
        Self {
            publisher,
            pending: Vec::with_capacity(18),
        }
    }

    fn publish(&self, message: &ServoMessage) -> Result<(), ActuationError> {
        let json = serde_json::to_string(message)?;
        self.publisher
            .put(json)
            .wait()
            .map_err(|e| ActuationError::Bus(e.to_string()))
    }
}

impl ServoSink for BusServoSink {
    fn set_angle(&mut self, channel: u8, angle: u8) -> Result<(), ActuationError> {
        let pwm = PwmChannel::from_global(channel)?;
        self.pending.push(ServoTarget {
            channel,
            angle,
            board: pwm.board,
            board_channel: pwm.channel,
            ticks: duty_ticks(angle),
        });
        Ok(())
    }

    fn relax(&mut self) -> Result<(), ActuationError> {
        self.pending.clear();
        self.publish(&relax_message())
    }

    fn flush(&mut self) -> Result<(), ActuationError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let targets = std::mem::take(&mut self.pending);
        debug!("Publishing servo frame with {} targets", targets.len());
        self.publish(&ServoMessage::Frame { targets })
    }
}

fn relax_message() -> ServoMessage {
    ServoMessage::Relax {
        channels: relax_channels(),
        off_ticks: FULL_OFF,
    }
}

/// Sink for dry runs: validates channels and logs
#[derive(Debug, Default)]
pub struct LogSink {
    writes: usize,
}

impl ServoSink for LogSink {
    fn set_angle(&mut self, channel: u8, angle: u8) -> Result<(), ActuationError> {
        let pwm = PwmChannel::from_global(channel)?;
        debug!(
            "servo {:>2} (board 0x{:02x} ch {:>2}) -> {:>3} deg",
            channel, pwm.board, pwm.channel, angle
        );
        self.writes += 1;
        Ok(())
    }

    fn relax(&mut self) -> Result<(), ActuationError> {
        info!("Relaxing all servos");
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ActuationError> {
        debug!("Frame complete ({} writes so far)", self.writes);
        Ok(())
    }
}

/// One call received by a `RecordingSink`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoEvent {
    Angle { channel: u8, angle: u8 },
    Relax,
    Flush,
}

/// Sink that records every call; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ServoEvent>>>,
    fail_on_flush: Arc<Mutex<Option<usize>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every flush once `flushes` frames have gone through
    pub fn fail_after(&self, flushes: usize) {
        *self.fail_on_flush.lock().unwrap_or_else(|e| e.into_inner()) = Some(flushes);
    }

    pub fn events(&self) -> Vec<ServoEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of completed frames
    pub fn frames(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ServoEvent::Flush))
            .count()
    }

    /// Angles of the last completed frame, by channel
    pub fn last_frame(&self) -> Vec<(u8, u8)> {
        let events = self.events();
        let end = events.iter().rposition(|e| matches!(e, ServoEvent::Flush));
        let Some(end) = end else {
            return Vec::new();
        };
        let start = events[..end]
            .iter()
            .rposition(|e| !matches!(e, ServoEvent::Angle { .. }))
            .map_or(0, |i| i + 1);
        events[start..end]
            .iter()
            .filter_map(|e| match *e {
                ServoEvent::Angle { channel, angle } => Some((channel, angle)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ServoEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl ServoSink for RecordingSink {
    fn set_angle(&mut self, channel: u8, angle: u8) -> Result<(), ActuationError> {
        PwmChannel::from_global(channel)?;
        self.push(ServoEvent::Angle { channel, angle });
        Ok(())
    }

    fn relax(&mut self) -> Result<(), ActuationError> {
        self.push(ServoEvent::Relax);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ActuationError> {
        let limit = *self.fail_on_flush.lock().unwrap_or_else(|e| e.into_inner());
        if limit.is_some_and(|limit| self.frames() >= limit) {
            return Err(ActuationError::Disconnected("recording sink".to_string()));
        }
        self.push(ServoEvent::Flush);
        Ok(())
    }
}
