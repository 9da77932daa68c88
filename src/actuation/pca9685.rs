// PCA9685 duty mapping for the servo boards
//
// Two 16-channel boards share the I2C bus: channels 0..15 live on 0x41,
// channels 16..31 on 0x40. Servos run at 50 Hz with 500..2500us pulses.

use serde::{Deserialize, Serialize};

use super::ActuationError;
use crate::motion::map_value;

/// Board address for channels 0..15
pub const LOWER_BOARD: u8 = 0x41;
/// Board address for channels 16..31
pub const UPPER_BOARD: u8 = 0x40;

pub const CHANNELS_PER_BOARD: u8 = 16;
pub const CHANNEL_COUNT: u8 = 2 * CHANNELS_PER_BOARD;

pub const PWM_FREQUENCY_HZ: f64 = 50.0;
const PERIOD_US: f64 = 1_000_000.0 / PWM_FREQUENCY_HZ; // 20000 us
const MIN_PULSE_US: f64 = 500.0;
const MAX_PULSE_US: f64 = 2500.0;
const TICKS_PER_PERIOD: f64 = 4095.0;

/// Off-count that turns a PCA9685 output fully off
pub const FULL_OFF: u16 = 4096;

/// A channel resolved to its board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmChannel {
    pub board: u8,
    pub channel: u8,
}

impl PwmChannel {
    /// Resolve a global channel 0..=31
    pub fn from_global(channel: u8) -> Result<Self, ActuationError> {
        match channel {
            c if c < CHANNELS_PER_BOARD => Ok(Self {
                board: LOWER_BOARD,
                channel: c,
            }),
            c if c < CHANNEL_COUNT => Ok(Self {
                board: UPPER_BOARD,
                channel: c - CHANNELS_PER_BOARD,
            }),
            c => Err(ActuationError::InvalidChannel { channel: c }),
        }
    }
}

/// 12-bit off-count for a servo angle in degrees
pub fn duty_ticks(angle: u8) -> u16 {
    let pulse_us = map_value(f64::from(angle), 0.0, 180.0, MIN_PULSE_US, MAX_PULSE_US);
    // Truncated like the board driver does
    map_value(pulse_us, 0.0, PERIOD_US, 0.0, TICKS_PER_PERIOD) as u16
}

/// Outputs cut when relaxing: the leg pins of both boards
pub fn relax_channels() -> Vec<PwmChannel> {
    let lower = (8..CHANNELS_PER_BOARD).map(|channel| PwmChannel {
        board: LOWER_BOARD,
        channel,
    });
    let upper = (0..CHANNELS_PER_BOARD).map(|channel| PwmChannel {
        board: UPPER_BOARD,
        channel,
    });
    lower.chain(upper).collect()
}
