// Gait generator
//
// One call runs a full gait cycle of F frames, pushing a pose update per
// frame and pacing frames with a short sleep. Two patterns exist:
// - "1": tripod-style, legs move in (even, odd) pairs
// - "2": wave-style, one leg at a time in a fixed stability order

use std::fmt;
use std::str::FromStr;
use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info};

use super::kinematics::{map_value, restrict_value};
use super::posture::Point;
use crate::actuation::ActuationError;
use crate::config::{LEG_COUNT, MAX_SPEED, MAX_STEP, MIN_SPEED, STEP_HEIGHT, WAVE_LEG_ORDER};

/// Gait pattern selector, as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaitId {
    /// Wire id "1"
    Tripod,
    /// Wire id "2"
    Wave,
}

impl GaitId {
    pub fn as_str(&self) -> &'static str {
        match self {
            GaitId::Tripod => "1",
            GaitId::Wave => "2",
        }
    }

    /// Frames in one cycle at the given speed code (higher speed, fewer frames)
    pub fn frame_count(&self, speed: i32) -> usize {
        let speed = f64::from(restrict_value(speed, MIN_SPEED, MAX_SPEED));
        let (lo, hi) = (f64::from(MIN_SPEED), f64::from(MAX_SPEED));
        let frames = match self {
            GaitId::Tripod => map_value(speed, lo, hi, 126.0, 22.0),
            GaitId::Wave => map_value(speed, lo, hi, 171.0, 45.0),
        };
        frames.round_ties_even() as usize
    }
}

impl fmt::Display for GaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown gait id {0:?}")]
pub struct UnknownGait(pub String);

impl FromStr for GaitId {
    type Err = UnknownGait;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(GaitId::Tripod),
            "2" => Ok(GaitId::Wave),
            other => Err(UnknownGait(other.to_string())),
        }
    }
}

/// Parameters of one gait cycle, already clamped to their bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaitRequest {
    pub gait: GaitId,
    pub x: i32,
    pub y: i32,
    pub speed: i32,
    /// Body rotation over the cycle (degrees, signed)
    pub angle: i32,
}

impl GaitRequest {
    pub fn new(gait: GaitId, x: i32, y: i32, speed: i32, angle: i32) -> Self {
        Self {
            gait,
            x: restrict_value(x, -MAX_STEP, MAX_STEP),
            y: restrict_value(y, -MAX_STEP, MAX_STEP),
            speed: restrict_value(speed, MIN_SPEED, MAX_SPEED),
            angle,
        }
    }

    /// A request with no translation and no rotation only re-seats the feet
    pub fn is_neutral(&self) -> bool {
        self.x == 0 && self.y == 0 && self.angle == 0
    }

    pub fn frame_count(&self) -> usize {
        self.gait.frame_count(self.speed)
    }
}

/// Error raised while a gait cycle is running
#[derive(Debug, thiserror::Error)]
pub enum GaitError {
    #[error("Actuation failed at gait frame {frame}: {source}")]
    Actuation {
        frame: usize,
        #[source]
        source: ActuationError,
    },
}

/// What the gait generator drives: the body pose and its leg actuation
pub trait LegDriver {
    /// Body-frame foot anchors the cycle starts from
    fn body_points(&self) -> [Point; LEG_COUNT];

    fn body_height(&self) -> f64;

    /// Project body-frame foot points into the legs and actuate them
    fn apply_body_points(&mut self, points: &[Point; LEG_COUNT]) -> Result<(), ActuationError>;
}

/// Run one gait cycle, returning the number of pose updates pushed
pub fn run_gait(
    driver: &mut impl LegDriver,
    request: &GaitRequest,
    frame_delay: Duration,
) -> Result<usize, GaitError> {
    let frames = request.frame_count();
    info!(
        "run_gait: gait={}, x={}, y={}, Z={}, F={}, angle={}",
        request.gait, request.x, request.y, STEP_HEIGHT, frames, request.angle
    );

    let mut cycle = GaitCycle {
        points: driver.body_points(),
        xy: [[0.0; 2]; LEG_COUNT],
        frames,
        dz: STEP_HEIGHT / frames as f64,
        frame_delay,
        pushed: 0,
    };

    if request.is_neutral() {
        cycle.push(driver)?;
        return Ok(cycle.pushed);
    }

    cycle.xy = frame_deltas(&cycle.points, request, frames);
    match request.gait {
        GaitId::Tripod => cycle.tripod(driver)?,
        GaitId::Wave => cycle.wave(driver)?,
    }

    info!("run_gait completed after {} frames", cycle.pushed);
    Ok(cycle.pushed)
}

/// Per-frame xy delta of each foot: rotation by -angle plus translation, over F frames
pub fn frame_deltas(
    points: &[Point; LEG_COUNT],
    request: &GaitRequest,
    frames: usize,
) -> [[f64; 2]; LEG_COUNT] {
    let (sin, cos) = f64::from(request.angle).to_radians().sin_cos();
    let frames = frames as f64;

    points.map(|[x, y, _]| {
        let rotated_x = x * cos + y * sin;
        let rotated_y = -x * sin + y * cos;
        [
            (rotated_x - x + f64::from(request.x)) / frames,
            (rotated_y - y + f64::from(request.y)) / frames,
        ]
    })
}

struct GaitCycle {
    points: [Point; LEG_COUNT],
    xy: [[f64; 2]; LEG_COUNT],
    frames: usize,
    /// Per-frame lift increment (Z / F)
    dz: f64,
    frame_delay: Duration,
    pushed: usize,
}

impl GaitCycle {
    fn push(&mut self, driver: &mut impl LegDriver) -> Result<(), GaitError> {
        driver
            .apply_body_points(&self.points)
            .map_err(|source| GaitError::Actuation {
                frame: self.pushed,
                source,
            })?;
        self.pushed += 1;
        Ok(())
    }

    fn pace(&self) {
        if !self.frame_delay.is_zero() {
            sleep(self.frame_delay);
        }
    }

    /// Shift a foot in the xy plane by `factor` per-frame deltas
    fn shift(&mut self, leg: usize, factor: f64) {
        self.points[leg][0] += factor * self.xy[leg][0];
        self.points[leg][1] += factor * self.xy[leg][1];
    }

    fn tripod(&mut self, driver: &mut impl LegDriver) -> Result<(), GaitError> {
        let f = self.frames as f64;
        let lifted = STEP_HEIGHT + driver.body_height();
        let lift = 8.0 * self.dz;

        for j in 0..self.frames {
            let phase = tripod_phase(j as f64, f);
            for pair in 0..3 {
                let (stance, swing) = (2 * pair, 2 * pair + 1);
                match phase {
                    0 => {
                        self.shift(stance, -4.0);
                        self.shift(swing, 8.0);
                        self.points[swing][2] = lifted;
                    }
                    1 => {
                        self.shift(stance, -4.0);
                        self.points[swing][2] -= lift;
                    }
                    2 => {
                        self.points[stance][2] += lift;
                        self.shift(swing, -4.0);
                    }
                    3 => {
                        self.shift(stance, 8.0);
                        self.shift(swing, -4.0);
                    }
                    4 => {
                        self.points[stance][2] -= lift;
                        self.shift(swing, -4.0);
                    }
                    5 => {
                        self.shift(stance, -4.0);
                        self.points[swing][2] += lift;
                    }
                    _ => {
                        self.shift(stance, -4.0);
                        self.shift(swing, 8.0);
                    }
                }
            }
            debug!("tripod frame {}/{} phase {}", j + 1, self.frames, phase);

            self.push(driver)?;
            self.pace();
        }
        Ok(())
    }

    fn wave(&mut self, driver: &mut impl LegDriver) -> Result<(), GaitError> {
        let slot = self.frames / 6;
        let (lift_end, move_end) = (self.frames / 18, self.frames / 9);
        let lift = 18.0 * self.dz;

        for &active in WAVE_LEG_ORDER.iter() {
            for j in 0..slot {
                for leg in 0..LEG_COUNT {
                    if leg != active {
                        // Supporting legs creep back to carry the body forward
                        self.shift(leg, -2.0);
                    } else if j < lift_end {
                        self.points[leg][2] += lift;
                    } else if j < move_end {
                        self.shift(leg, 30.0);
                    } else {
                        self.points[leg][2] -= lift;
                    }
                }
                debug!("wave leg {} step {}/{}", active, j + 1, slot);

                self.push(driver)?;
                self.pace();
            }
        }
        Ok(())
    }
}

/// Phase index 0..=6 of frame `j` in a tripod cycle of `f` frames
fn tripod_phase(j: f64, f: f64) -> u8 {
    if j < f / 8.0 {
        0
    } else if j < f / 4.0 {
        1
    } else if j < 3.0 * f / 8.0 {
        2
    } else if j < 5.0 * f / 8.0 {
        3
    } else if j < 3.0 * f / 4.0 {
        4
    } else if j < 7.0 * f / 8.0 {
        5
    } else {
        6
    }
}
