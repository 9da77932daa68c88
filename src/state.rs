// Robot-wide mode flags shared between the control loop, routines and the bus bridge

use std::sync::{Mutex, MutexGuard};

use tracing::info;

/// Snapshot of the mode flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modes {
    /// A motion routine is running
    pub motion_active: bool,
    /// Obstacle-avoidance mode
    pub sonic_active: bool,
    pub calibration_mode: bool,
    /// Servo power is cut; all actuation is suppressed
    pub servo_off: bool,
    pub servo_relaxed: bool,
}

/// Mode flags behind one lock
///
/// Entering calibration mode clears the motion and sonic flags under the same
/// lock, so no reader can see calibration together with either of them.
#[derive(Debug, Default)]
pub struct RobotState {
    modes: Mutex<Modes>,
}

impl RobotState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Modes> {
        self.modes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn modes(&self) -> Modes {
        *self.lock()
    }

    pub fn motion_active(&self) -> bool {
        self.lock().motion_active
    }

    pub fn set_motion_active(&self, active: bool) {
        self.lock().motion_active = active;
    }

    pub fn sonic_active(&self) -> bool {
        self.lock().sonic_active
    }

    pub fn set_sonic_active(&self, active: bool) {
        self.lock().sonic_active = active;
    }

    pub fn calibration_mode(&self) -> bool {
        self.lock().calibration_mode
    }

    pub fn set_calibration_mode(&self, enabled: bool) {
        let mut modes = self.lock();
        modes.calibration_mode = enabled;
        if enabled {
            modes.motion_active = false;
            modes.sonic_active = false;
        }
        info!("Calibration mode {}", if enabled { "on" } else { "off" });
    }

    pub fn servo_off(&self) -> bool {
        self.lock().servo_off
    }

    pub fn set_servo_off(&self, off: bool) {
        let mut modes = self.lock();
        if modes.servo_off != off {
            info!("Servo power {}", if off { "off" } else { "on" });
        }
        modes.servo_off = off;
    }

    pub fn servo_relaxed(&self) -> bool {
        self.lock().servo_relaxed
    }

    pub fn set_servo_relaxed(&self, relaxed: bool) {
        self.lock().servo_relaxed = relaxed;
    }

    /// Flip the relaxed flag, returning the new value
    pub fn toggle_relaxed(&self) -> bool {
        let mut modes = self.lock();
        modes.servo_relaxed = !modes.servo_relaxed;
        modes.servo_relaxed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_calibration_clears_motion_and_sonic() {
        let state = RobotState::new();
        state.set_motion_active(true);
        state.set_sonic_active(true);

        state.set_calibration_mode(true);
        let modes = state.modes();
        assert!(modes.calibration_mode);
        assert!(!modes.motion_active);
        assert!(!modes.sonic_active);

        // Leaving calibration does not bring them back
        state.set_calibration_mode(false);
        assert!(!state.motion_active());
    }

    #[test]
    fn test_no_reader_sees_calibration_with_motion() {
        let state = Arc::new(RobotState::new());
        state.set_motion_active(true);
        state.set_sonic_active(true);

        let reader = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    let modes = state.modes();
                    if modes.calibration_mode {
                        assert!(!modes.motion_active && !modes.sonic_active);
                        return true;
                    }
                    thread::yield_now();
                }
                false
            })
        };

        state.set_calibration_mode(true);
        let saw_calibration = reader.join().unwrap();
        println!("reader observed calibration: {}", saw_calibration);
        assert!(!state.motion_active() && !state.sonic_active());
    }

    #[test]
    fn test_toggle_relaxed() {
        let state = RobotState::new();
        assert!(state.toggle_relaxed());
        assert!(state.servo_relaxed());
        assert!(!state.toggle_relaxed());
    }
}
