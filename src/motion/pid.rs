// Incremental PID controller used by the IMU balance loop

use tracing::debug;

/// Single-axis PID with a saturated integral term
#[derive(Debug, Clone)]
pub struct IncrementalPid {
    kp: f64,
    ki: f64,
    kd: f64,
    i_saturation: f64,
    target: f64,
    last_error: f64,
    i_error: f64,
}

impl IncrementalPid {
    pub fn new(kp: f64, ki: f64, kd: f64, i_saturation: f64) -> Self {
        debug!("PID initialized - P: {:.3}, I: {:.3}, D: {:.3}", kp, ki, kd);
        Self {
            kp,
            ki,
            kd,
            i_saturation,
            target: 0.0,
            last_error: 0.0,
            i_error: 0.0,
        }
    }

    /// Create from a `(P, I, D)` gain triple
    pub fn with_gains((kp, ki, kd): (f64, f64, f64), i_saturation: f64) -> Self {
        Self::new(kp, ki, kd, i_saturation)
    }

    /// Feed one measurement, returning the controller output
    pub fn update(&mut self, feedback: f64) -> f64 {
        let error = self.target - feedback;
        let p = self.kp * error;
        self.i_error = (self.i_error + error).clamp(-self.i_saturation, self.i_saturation);
        let d = self.kd * (error - self.last_error);
        self.last_error = error;

        p + self.ki * self.i_error + d
    }

    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    /// Clear accumulated integral and derivative history
    pub fn reset(&mut self) {
        self.last_error = 0.0;
        self.i_error = 0.0;
    }
}
