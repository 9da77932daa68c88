// Define message types exchanged over the bus

use serde::{Deserialize, Serialize};

use crate::actuation::pca9685::PwmChannel;
use crate::config::LEG_COUNT;
use crate::motion::JointAngles;
use crate::motion::calibration::CalibrationPoints;
use crate::motion::posture::Point;

// One servo target in an actuation frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoTarget {
    pub channel: u8,
    pub angle: u8,
    pub board: u8,
    pub board_channel: u8,
    pub ticks: u16,
}

// Actuation output from runtime -> servo hardware process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServoMessage {
    Frame { targets: Vec<ServoTarget> },
    /// Outputs to switch off, with the off-count that does it
    Relax { channels: Vec<PwmChannel>, off_ticks: u16 },
}

// IMU attitude from the sensor process -> runtime (degrees)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// What the control loop last did
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    #[default]
    Idle,
    Position,
    Attitude,
    Moving,
    Balancing,
}

/// Read-only view of the leg state, published after every committed update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegSnapshot {
    pub status: ControlStatus,
    pub relaxed: bool,
    pub body_height: f64,
    pub leg_positions: [Point; LEG_COUNT],
    pub joint_angles: [JointAngles; LEG_COUNT],
    pub calibration_points: CalibrationPoints,
    pub calibration_offsets: [JointAngles; LEG_COUNT],
}

// Status published by runtime
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport<'a> {
    pub servo_off: bool,
    pub calibration_mode: bool,
    pub motion_active: bool,
    #[serde(flatten)]
    pub legs: &'a LegSnapshot,
}
