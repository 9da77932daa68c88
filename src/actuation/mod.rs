// Servo actuation for the hexapod legs
//
// Provides:
// - The servo sink boundary the control loop writes joint angles to
// - The fixed leg/joint -> servo channel table
// - PCA9685 duty mapping for the two 16-channel boards
// - Sinks: pub/sub bus, log-only, and a recording sink for diagnostics

pub mod pca9685;
mod sink;

pub use sink::{BusServoSink, LogSink, RecordingSink, ServoEvent};

use crate::config::LEG_COUNT;
use crate::motion::JointAngles;
use crate::motion::restrict_value;

/// Servo channels per leg as `[hip, knee, ankle]`
///
/// Wiring follows the two boards, not the leg index: legs 3..5 sit on the
/// upper board in reverse order and a few joints use out-of-sequence pins.
pub const LEG_CHANNELS: [[u8; 3]; LEG_COUNT] = [
    [15, 14, 13],
    [12, 11, 10],
    [9, 8, 31],
    [22, 23, 27],
    [19, 20, 21],
    [16, 17, 18],
];

/// Order in which legs are written during one update
pub const WRITE_ORDER: [usize; LEG_COUNT] = [0, 1, 2, 5, 4, 3];

pub const SERVO_MIN_ANGLE: i32 = 0;
pub const SERVO_MAX_ANGLE: i32 = 180;

/// Error types for servo actuation
#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    #[error("Servo channel {channel} out of range")]
    InvalidChannel { channel: u8 },

    #[error("Failed to encode servo message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Servo sink disconnected: {0}")]
    Disconnected(String),
}

/// Consumer of servo angle updates
pub trait ServoSink: Send {
    /// Set one channel (0..=31) to an angle (0..=180)
    fn set_angle(&mut self, channel: u8, angle: u8) -> Result<(), ActuationError>;

    /// Cut the drive signal on every servo
    fn relax(&mut self) -> Result<(), ActuationError>;

    /// Called once all channels of an update have been set
    fn flush(&mut self) -> Result<(), ActuationError> {
        Ok(())
    }
}

impl<S: ServoSink + ?Sized> ServoSink for Box<S> {
    fn set_angle(&mut self, channel: u8, angle: u8) -> Result<(), ActuationError> {
        (**self).set_angle(channel, angle)
    }

    fn relax(&mut self) -> Result<(), ActuationError> {
        (**self).relax()
    }

    fn flush(&mut self) -> Result<(), ActuationError> {
        (**self).flush()
    }
}

/// Convert calibrated joint angles to servo angles
///
/// The two sides of the chassis mount their knee and ankle servos mirrored,
/// so legs 0..2 and 3..5 fold the angle differently.
pub fn servo_angles(
    raw: &[JointAngles; LEG_COUNT],
    offsets: &[JointAngles; LEG_COUNT],
) -> [JointAngles; LEG_COUNT] {
    let mut out = [[0; 3]; LEG_COUNT];
    for leg in 0..LEG_COUNT {
        let [hip, knee, ankle] = raw[leg];
        let [d_hip, d_knee, d_ankle] = offsets[leg];
        let folded = if leg < LEG_COUNT / 2 {
            [hip + d_hip, 90 - (knee + d_knee), ankle + d_ankle]
        } else {
            [hip + d_hip, 90 + knee + d_knee, 180 - (ankle + d_ankle)]
        };
        out[leg] = folded.map(|a| restrict_value(a, SERVO_MIN_ANGLE, SERVO_MAX_ANGLE));
    }
    out
}

/// Write all 18 joints to the sink and flush
pub fn write_legs(
    sink: &mut dyn ServoSink,
    angles: &[JointAngles; LEG_COUNT],
) -> Result<(), ActuationError> {
    for leg in WRITE_ORDER {
        for (joint, &channel) in LEG_CHANNELS[leg].iter().enumerate() {
            let angle = restrict_value(angles[leg][joint], SERVO_MIN_ANGLE, SERVO_MAX_ANGLE);
            sink.set_angle(channel, angle as u8)?;
        }
    }
    sink.flush()
}
