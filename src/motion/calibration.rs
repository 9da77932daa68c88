// Per-leg calibration
//
// Each leg stores the leg-local position its foot actually needs to be
// commanded to in order to stand in the neutral stance. The angle difference
// between that position and the nominal neutral stance is added to every
// live angle computation.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::kinematics::coordinate_to_angle;
use super::posture::Point;
use crate::config::{LEG_COUNT, NEUTRAL_STANCE};

/// Joint angles or offsets as `[hip, knee, ankle]` degrees
pub type JointAngles = [i32; 3];

/// Stored calibration target per leg, leg-local `[x, y, z]` mm
pub type CalibrationPoints = [[i32; 3]; LEG_COUNT];

/// Error types for the calibration store
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed calibration line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Calibration store has {rows} rows, expected 6")]
    TooShort { rows: usize },
}

/// Neutral stance for every leg
pub fn neutral_stance() -> [Point; LEG_COUNT] {
    [NEUTRAL_STANCE.map(f64::from); LEG_COUNT]
}

/// Joint angles for a leg-local point, before calibration is applied
pub fn raw_leg_angles(point: &Point) -> JointAngles {
    let (hip, knee, ankle) = coordinate_to_angle(-point[2], point[0], point[1]);
    [hip, knee, ankle]
}

/// Calibration targets and the offsets derived from them
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    points: CalibrationPoints,
    offsets: [JointAngles; LEG_COUNT],
}

impl Calibration {
    pub fn new(points: CalibrationPoints) -> Self {
        let mut calibration = Self {
            points,
            offsets: [[0; 3]; LEG_COUNT],
        };
        calibration.recompute();
        calibration
    }

    /// Regenerate all six offsets from the stored targets
    pub fn recompute(&mut self) {
        let neutral = raw_leg_angles(&NEUTRAL_STANCE.map(f64::from));
        for (offset, point) in self.offsets.iter_mut().zip(self.points.iter()) {
            let target = raw_leg_angles(&point.map(f64::from));
            *offset = [
                target[0] - neutral[0],
                target[1] - neutral[1],
                target[2] - neutral[2],
            ];
        }
        debug!("Calibration offsets: {:?}", self.offsets);
    }

    /// Replace one leg's target and regenerate every offset
    ///
    /// Returns false, changing nothing, if `leg` is not a leg index.
    pub fn set_leg(&mut self, leg: usize, point: [i32; 3]) -> bool {
        let Some(slot) = self.points.get_mut(leg) else {
            return false;
        };
        *slot = point;
        self.recompute();
        true
    }

    pub fn points(&self) -> &CalibrationPoints {
        &self.points
    }

    pub fn offsets(&self) -> &[JointAngles; LEG_COUNT] {
        &self.offsets
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new([NEUTRAL_STANCE; LEG_COUNT])
    }
}

/// File-backed calibration targets: six lines of three tab-separated integers
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored targets, falling back to the neutral stance
    pub fn load(&self) -> CalibrationPoints {
        match self.try_load() {
            Ok(points) => {
                info!("Calibration data read from {}", self.path.display());
                points
            }
            Err(e) => {
                warn!("{}; using default calibration positions", e);
                [NEUTRAL_STANCE; LEG_COUNT]
            }
        }
    }

    /// Read the stored targets
    pub fn try_load(&self) -> Result<CalibrationPoints, CalibrationError> {
        let text = fs::read_to_string(&self.path).map_err(|source| CalibrationError::Io {
            path: self.path.clone(),
            source,
        })?;
        parse_points(&text)
    }

    /// Write the targets, one leg per line
    pub fn save(&self, points: &CalibrationPoints) -> Result<(), CalibrationError> {
        fs::write(&self.path, format_points(points)).map_err(|source| CalibrationError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!("Calibration data saved to {}", self.path.display());
        Ok(())
    }
}

/// Parse the store format; extra lines after the sixth row are ignored
pub fn parse_points(text: &str) -> Result<CalibrationPoints, CalibrationError> {
    let mut points = [[0; 3]; LEG_COUNT];
    let mut rows = 0;

    for (index, line) in text.lines().enumerate() {
        if rows == LEG_COUNT {
            break;
        }
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 3 {
            return Err(CalibrationError::Malformed {
                line: index + 1,
                reason: format!("expected 3 fields, got {}", fields.len()),
            });
        }
        for (slot, field) in points[rows].iter_mut().zip(fields) {
            *slot = field
                .trim()
                .parse()
                .map_err(|_| CalibrationError::Malformed {
                    line: index + 1,
                    reason: format!("not an integer: {:?}", field),
                })?;
        }
        rows += 1;
    }

    if rows < LEG_COUNT {
        return Err(CalibrationError::TooShort { rows });
    }
    Ok(points)
}

pub fn format_points(points: &CalibrationPoints) -> String {
    points
        .iter()
        .map(|[x, y, z]| format!("{x}\t{y}\t{z}\n"))
        .collect()
}
