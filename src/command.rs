// Commands accepted by the control loop, and their wire form
//
// Wire frames are '#'-separated text, e.g. "CMD_MOVE#1#0#35#8#0".

use std::fmt;
use std::str::FromStr;

use crate::config::LEG_COUNT;
use crate::motion::{GaitId, GaitRequest};

pub const CMD_MOVE: &str = "CMD_MOVE";
pub const CMD_POSITION: &str = "CMD_POSITION";
pub const CMD_ATTITUDE: &str = "CMD_ATTITUDE";
pub const CMD_BALANCE: &str = "CMD_BALANCE";
pub const CMD_CALIBRATION: &str = "CMD_CALIBRATION";
pub const CMD_RELAX: &str = "CMD_RELAX";
pub const CMD_SERVOPOWER: &str = "CMD_SERVOPOWER";

/// Leg selectors of a calibration command, legs 0..5
const LEG_SELECTORS: [&str; LEG_COUNT] = ["one", "two", "three", "four", "five", "six"];

/// Error types for wire command parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command tag {0:?}")]
    UnknownTag(String),

    #[error("{tag} expects {expected} fields, got {got}")]
    Arity {
        tag: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{tag}: field {index} is not an integer: {value:?}")]
    NotAnInteger {
        tag: &'static str,
        index: usize,
        value: String,
    },

    #[error("{tag}: expected 0 or 1, got {value:?}")]
    InvalidFlag { tag: &'static str, value: String },

    #[error(transparent)]
    Gait(#[from] crate::motion::gait::UnknownGait),

    #[error("Unknown calibration selector {0:?}")]
    UnknownSelector(String),
}

/// Calibration sub-command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationCommand {
    /// Recompute offsets and re-push angles
    Refresh,
    /// Store a new leg-local target for one leg
    SetLeg { leg: usize, point: [i32; 3] },
    /// Write the targets to the calibration store
    Save,
}

/// A command the control loop executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move(GaitRequest),
    /// Body translation in mm, clamped when executed
    Position { x: i32, y: i32, z: i32 },
    /// Body tilt in degrees, clamped when executed
    Attitude { roll: i32, pitch: i32, yaw: i32 },
    Balance(bool),
    Calibration(CalibrationCommand),
    Relax,
}

impl Command {
    /// Neutral move that re-seats the feet
    pub fn stop() -> Self {
        Command::Move(GaitRequest::new(GaitId::Tripod, 0, 0, 8, 0))
    }
}

/// Everything that can arrive on the command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCommand {
    Control(Command),
    /// Servo power on (true) or off (false); handled outside the slot
    ServoPower(bool),
}

impl FromStr for WireCommand {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split('#').map(str::trim).collect();
        let tag = fields.first().copied().unwrap_or_default();

        let command = match tag {
            "" => return Err(CommandParseError::Empty),
            CMD_MOVE => {
                let [gait, x, y, speed, angle] = args::<5>(CMD_MOVE, &fields)?;
                let gait: GaitId = gait.parse()?;
                let [x, y, speed, angle] = ints(CMD_MOVE, [x, y, speed, angle])?;
                Command::Move(GaitRequest::new(gait, x, y, speed, angle))
            }
            CMD_POSITION => {
                let [x, y, z] = ints(CMD_POSITION, args::<3>(CMD_POSITION, &fields)?)?;
                Command::Position { x, y, z }
            }
            CMD_ATTITUDE => {
                let [roll, pitch, yaw] = ints(CMD_ATTITUDE, args::<3>(CMD_ATTITUDE, &fields)?)?;
                Command::Attitude { roll, pitch, yaw }
            }
            CMD_BALANCE => {
                let [flag] = args::<1>(CMD_BALANCE, &fields)?;
                Command::Balance(flag == "1")
            }
            CMD_CALIBRATION => Command::Calibration(parse_calibration(&fields)?),
            CMD_RELAX => Command::Relax,
            CMD_SERVOPOWER => {
                let on = match args::<1>(CMD_SERVOPOWER, &fields)? {
                    ["0"] => false,
                    ["1"] => true,
                    [other] => {
                        return Err(CommandParseError::InvalidFlag {
                            tag: CMD_SERVOPOWER,
                            value: other.to_string(),
                        });
                    }
                };
                return Ok(WireCommand::ServoPower(on));
            }
            other => return Err(CommandParseError::UnknownTag(other.to_string())),
        };
        Ok(WireCommand::Control(command))
    }
}

fn parse_calibration(fields: &[&str]) -> Result<CalibrationCommand, CommandParseError> {
    let Some(&selector) = fields.get(1) else {
        return Ok(CalibrationCommand::Refresh);
    };
    if selector == "save" {
        return Ok(CalibrationCommand::Save);
    }
    let leg = LEG_SELECTORS
        .iter()
        .position(|&s| s == selector)
        .ok_or_else(|| CommandParseError::UnknownSelector(selector.to_string()))?;
    let [_, x, y, z] = args::<4>(CMD_CALIBRATION, fields)?;
    let point = ints(CMD_CALIBRATION, [x, y, z])?;
    Ok(CalibrationCommand::SetLeg { leg, point })
}

/// The N fields after the tag
fn args<'a, const N: usize>(
    tag: &'static str,
    fields: &[&'a str],
) -> Result<[&'a str; N], CommandParseError> {
    fields
        .get(1..)
        .and_then(|rest| <[&str; N]>::try_from(rest).ok())
        .ok_or(CommandParseError::Arity {
            tag,
            expected: N + 1,
            got: fields.len(),
        })
}

fn ints<const N: usize>(tag: &'static str, fields: [&str; N]) -> Result<[i32; N], CommandParseError> {
    let mut out = [0; N];
    for (index, (slot, field)) in out.iter_mut().zip(fields).enumerate() {
        *slot = field.parse().map_err(|_| CommandParseError::NotAnInteger {
            tag,
            index: index + 1,
            value: field.to_string(),
        })?;
    }
    Ok(out)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move(r) => write!(
                f,
                "{CMD_MOVE}#{}#{}#{}#{}#{}",
                r.gait, r.x, r.y, r.speed, r.angle
            ),
            Command::Position { x, y, z } => write!(f, "{CMD_POSITION}#{x}#{y}#{z}"),
            Command::Attitude { roll, pitch, yaw } => {
                write!(f, "{CMD_ATTITUDE}#{roll}#{pitch}#{yaw}")
            }
            Command::Balance(on) => write!(f, "{CMD_BALANCE}#{}", u8::from(*on)),
            Command::Calibration(CalibrationCommand::Refresh) => f.write_str(CMD_CALIBRATION),
            Command::Calibration(CalibrationCommand::Save) => write!(f, "{CMD_CALIBRATION}#save"),
            Command::Calibration(CalibrationCommand::SetLeg { leg, point }) => write!(
                f,
                "{CMD_CALIBRATION}#{}#{}#{}#{}",
                LEG_SELECTORS[*leg], point[0], point[1], point[2]
            ),
            Command::Relax => f.write_str(CMD_RELAX),
        }
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireCommand::Control(command) => fmt::Display::fmt(command, f),
            WireCommand::ServoPower(on) => write!(f, "{CMD_SERVOPOWER}#{}", u8::from(*on)),
        }
    }
}
