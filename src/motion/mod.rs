// Motion core for the six-legged base
//
// Provides:
// - Leg inverse/forward kinematics
// - Body posture and per-leg frame projection
// - Per-leg calibration and its file store
// - Tripod and wave gait generation
// - Incremental PID for IMU balancing

pub mod calibration;
pub mod gait;
pub mod kinematics;
pub mod pid;
pub mod posture;

pub use calibration::{Calibration, CalibrationError, CalibrationStore, JointAngles};
pub use gait::{GaitError, GaitId, GaitRequest};
pub use kinematics::{angle_to_coordinate, coordinate_to_angle, map_value, restrict_value};
pub use pid::IncrementalPid;
pub use posture::{Point, calculate_posture_balance, transform_coordinates};
