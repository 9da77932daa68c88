// Chassis geometry, timing, topics and runtime-tunable control settings
use std::path::PathBuf;
use std::time::Duration;

// === Leg geometry (mm) ===

/// Coxa, femur and tibia link lengths
pub const LINK_LENGTHS: (f64, f64, f64) = (33.0, 90.0, 110.0);

/// A leg target is only actuated if its distance from the hip lies in this range
pub const MIN_LEG_REACH: f64 = 90.0;
pub const MAX_LEG_REACH: f64 = 248.0;

/// Leg-local neutral stance used as the calibration reference
pub const NEUTRAL_STANCE: [i32; 3] = [140, 0, 0];

// === Body geometry ===

pub const LEG_COUNT: usize = 6;

/// Body height the robot boots with
pub const DEFAULT_BODY_HEIGHT: f64 = -25.0;

/// Body height a Position command offsets its z from
pub const POSITION_BASE_HEIGHT: f64 = -30.0;

/// Body-frame foot anchors (asymmetric hex layout), legs 0..5
pub const BODY_ANCHORS: [[f64; 2]; LEG_COUNT] = [
    [137.1, 189.4],
    [225.0, 0.0],
    [137.1, -189.4],
    [-137.1, -189.4],
    [-225.0, 0.0],
    [-137.1, 189.4],
];

/// Hip mounting angle of each leg around the body z axis (degrees)
pub const LEG_MOUNT_ANGLES: [f64; LEG_COUNT] = [54.0, 0.0, -54.0, -126.0, 180.0, 126.0];

/// Distance from body center to each hip along the mount direction (mm)
pub const LEG_MOUNT_OFFSETS: [f64; LEG_COUNT] = [94.0, 85.0, 94.0, 94.0, 85.0, 94.0];

/// Hip height below the body frame origin (mm)
pub const LEG_MOUNT_Z: f64 = 14.0;

// === Gait ===

/// Order in which the wave gait lifts legs (stability order, not index order)
pub const WAVE_LEG_ORDER: [usize; LEG_COUNT] = [5, 2, 1, 0, 3, 4];

/// Step height (mm)
pub const STEP_HEIGHT: f64 = 40.0;

/// Bound on per-cycle translation (mm)
pub const MAX_STEP: i32 = 35;

/// Speed code range accepted by the gait generator
pub const MIN_SPEED: i32 = 2;
pub const MAX_SPEED: i32 = 10;

// === Command bounds ===

pub const MAX_POSITION_XY: i32 = 40;
pub const MAX_POSITION_Z: i32 = 20;
pub const MAX_ATTITUDE: i32 = 15;

// === Timing ===

/// Pause between gait frames
pub const FRAME_DELAY: Duration = Duration::from_millis(10);

/// Idle wait while servo power is off
pub const SERVO_OFF_IDLE: Duration = Duration::from_millis(100);

/// Control loop wakeup period when no command arrives (drives the auto-relax check)
pub const POLL_TICK: Duration = Duration::from_millis(20);

/// Inactivity before auto-relax kicks in
pub const AUTO_RELAX_AFTER: Duration = Duration::from_secs(10);

/// IMU sample period inside the balance loop
pub const BALANCE_PERIOD: Duration = Duration::from_millis(20);

/// IMU samples older than this are not used for balancing
pub const IMU_STALE_AFTER: Duration = Duration::from_millis(500);

/// Settling time before the IMU is re-zeroed, and after
pub const BALANCE_SETTLE: (Duration, Duration) = (Duration::from_secs(2), Duration::from_secs(1));

/// Cancellation check granularity of motion routines
pub const ROUTINE_SLICE: Duration = Duration::from_millis(100);

/// Slices between two Move resubmissions of a motion routine
pub const ROUTINE_SLICES_PER_MOVE: u32 = 6;

// === Balance PID ===

pub const BALANCE_PID_GAINS: (f64, f64, f64) = (0.5, 0.0, 0.0025);
pub const BALANCE_PID_I_SATURATION: f64 = 10.0;

// === Bus ===

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

pub const TOPIC_CMD: &str = "aranea/cmd"; // wire commands
pub const TOPIC_IMU: &str = "aranea/state/imu"; // IMU samples from the hardware process
pub const TOPIC_SERVOS: &str = "aranea/rt/servos"; // actuation
pub const TOPIC_STATUS: &str = "aranea/state/status"; // leg/body snapshot

/// Calibration store used when none is given on the command line
pub const DEFAULT_CALIBRATION_FILE: &str = "point.txt";

/// Settings the control loop reads at runtime
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Relax all servos after `auto_relax_after` without a command
    pub auto_relax: bool,
    pub auto_relax_after: Duration,
    /// Keep a Move command in the slot after its cycle, so the gait repeats
    pub retain_move: bool,
    pub frame_delay: Duration,
    pub balance_settle: (Duration, Duration),
    pub balance_period: Duration,
    pub calibration_path: PathBuf,
    pub pid_gains: (f64, f64, f64),
    pub pid_i_saturation: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            auto_relax: false,
            auto_relax_after: AUTO_RELAX_AFTER,
            retain_move: false,
            frame_delay: FRAME_DELAY,
            balance_settle: BALANCE_SETTLE,
            balance_period: BALANCE_PERIOD,
            calibration_path: PathBuf::from(DEFAULT_CALIBRATION_FILE),
            pid_gains: BALANCE_PID_GAINS,
            pid_i_saturation: BALANCE_PID_I_SATURATION,
        }
    }
}
