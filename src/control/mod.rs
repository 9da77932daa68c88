// Control loop for the hexapod
//
// One thread owns the leg state and serves the command slot. Per iteration:
// 1. servo power off -> idle
// 2. auto-relax after a long quiet period
// 3. execute the pending command (Position > Attitude > Move > Balance >
//    Calibration > Relax), then clear the slot

mod context;
mod slot;

pub use context::RobotContext;
pub use slot::CommandSlot;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::actuation::{ActuationError, ServoSink, servo_angles, write_legs};
use crate::command::{CalibrationCommand, Command};
use crate::config::{
    ControlConfig, DEFAULT_BODY_HEIGHT, LEG_COUNT, MAX_ATTITUDE, MAX_LEG_REACH, MAX_POSITION_XY,
    MAX_POSITION_Z, MIN_LEG_REACH, POLL_TICK, POSITION_BASE_HEIGHT, SERVO_OFF_IDLE,
};
use crate::messages::{ControlStatus, LegSnapshot};
use crate::motion::calibration::{neutral_stance, raw_leg_angles};
use crate::motion::gait::{LegDriver, run_gait};
use crate::motion::posture::{body_points, leg_length};
use crate::motion::{
    Calibration, CalibrationError, CalibrationStore, GaitError, IncrementalPid, JointAngles, Point,
    calculate_posture_balance, restrict_value, transform_coordinates,
};
use crate::sensor::{AttitudeSensor, SensorError};

/// Failure while executing one command; logged and dropped by the loop
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Actuation(#[from] ActuationError),

    #[error(transparent)]
    Gait(#[from] GaitError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

pub struct Control {
    ctx: Arc<RobotContext>,
    config: ControlConfig,
    sink: Box<dyn ServoSink>,
    sensor: Box<dyn AttitudeSensor>,
    store: CalibrationStore,
    calibration: Calibration,
    /// Body-frame foot anchors at the current body height
    body_points: [Point; LEG_COUNT],
    body_height: f64,
    /// Leg-local foot positions of the last committed update
    legs: [Point; LEG_COUNT],
    /// Servo angles of the last committed update
    joint_angles: [JointAngles; LEG_COUNT],
    roll_pid: IncrementalPid,
    pitch_pid: IncrementalPid,
    status: ControlStatus,
}

impl Control {
    pub fn new(
        ctx: Arc<RobotContext>,
        config: ControlConfig,
        sink: Box<dyn ServoSink>,
        sensor: Box<dyn AttitudeSensor>,
    ) -> Self {
        let store = CalibrationStore::new(config.calibration_path.clone());
        let calibration = Calibration::new(store.load());
        let roll_pid = IncrementalPid::with_gains(config.pid_gains, config.pid_i_saturation);
        let pitch_pid = roll_pid.clone();

        let control = Self {
            ctx,
            config,
            sink,
            sensor,
            store,
            calibration,
            body_points: body_points(DEFAULT_BODY_HEIGHT),
            body_height: DEFAULT_BODY_HEIGHT,
            legs: neutral_stance(),
            joint_angles: [[90, 0, 0]; LEG_COUNT],
            roll_pid,
            pitch_pid,
            status: ControlStatus::Idle,
        };
        control.publish();
        control
    }

    pub fn status(&self) -> ControlStatus {
        self.status
    }

    pub fn legs(&self) -> &[Point; LEG_COUNT] {
        &self.legs
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Put every leg in the neutral stance
    pub fn stand(&mut self) -> Result<(), ActuationError> {
        self.commit_legs(neutral_stance())?;
        Ok(())
    }

    /// Run one loop iteration; returns true if any work was done
    pub fn poll_once(&mut self) -> bool {
        if self.ctx.state.servo_off() {
            return false;
        }

        if self.auto_relax_due() {
            self.auto_relax();
            return true;
        }

        let Some((seq, command)) = self.ctx.slot.peek() else {
            return false;
        };
        debug!("Processing command #{}: {}", seq, command);

        if let Err(e) = self.execute(seq, command) {
            error!("Command {} failed: {}", command, e);
            self.ctx.slot.clear_if(seq);
            self.set_status(ControlStatus::Idle);
        }
        true
    }

    /// Loop until a stop is requested
    pub fn run(mut self) {
        info!("Control loop started");
        if let Err(e) = self.stand() {
            error!("Failed to stand up: {}", e);
        }

        while !self.ctx.stop_requested() {
            if self.ctx.state.servo_off() {
                thread::sleep(SERVO_OFF_IDLE);
                continue;
            }
            if !self.poll_once() {
                self.ctx.slot.wait(POLL_TICK);
            }
        }
        info!("Control loop stopped");
    }

    /// Move the loop onto its own thread
    pub fn spawn(self) -> std::io::Result<ControlHandle> {
        let ctx = Arc::clone(&self.ctx);
        let thread = thread::Builder::new()
            .name("control".to_string())
            .spawn(move || self.run())?;
        Ok(ControlHandle {
            ctx,
            thread: Some(thread),
        })
    }

    fn execute(&mut self, seq: u64, command: Command) -> Result<(), ControlError> {
        match command {
            Command::Position { x, y, z } => {
                self.move_position(x, y, z)?;
                self.finish(seq, ControlStatus::Position);
            }
            Command::Attitude { roll, pitch, yaw } => {
                self.set_attitude(roll, pitch, yaw)?;
                self.finish(seq, ControlStatus::Attitude);
            }
            Command::Move(request) => {
                let frame_delay = self.config.frame_delay;
                run_gait(self, &request, frame_delay)?;
                // Only a translating gait repeats; turning in place is one-shot
                let in_place = request.x == 0 && request.y == 0;
                if request.is_neutral() {
                    self.finish(seq, self.status);
                } else if self.config.retain_move && !in_place {
                    self.set_status(ControlStatus::Moving);
                } else {
                    self.finish(seq, ControlStatus::Moving);
                }
            }
            Command::Balance(enable) => {
                self.ctx.slot.clear_if(seq);
                if enable {
                    self.balance()?;
                }
            }
            Command::Calibration(sub) => self.calibrate(seq, sub)?,
            Command::Relax => {
                self.toggle_relax()?;
                self.ctx.slot.clear_if(seq);
            }
        }
        Ok(())
    }

    fn finish(&mut self, seq: u64, status: ControlStatus) {
        self.ctx.slot.clear_if(seq);
        self.set_status(status);
    }

    fn move_position(&mut self, x: i32, y: i32, z: i32) -> Result<(), ActuationError> {
        let x = f64::from(restrict_value(x, -MAX_POSITION_XY, MAX_POSITION_XY));
        let y = f64::from(restrict_value(y, -MAX_POSITION_XY, MAX_POSITION_XY));
        let z = f64::from(restrict_value(z, -MAX_POSITION_Z, MAX_POSITION_Z));
        let height = POSITION_BASE_HEIGHT - z;
        info!("Position: x={}, y={}, body height {}", x, y, height);

        let points = self.body_points.map(|[bx, by, _]| [bx - x, by - y, height]);
        if self.commit_legs(transform_coordinates(&points))? {
            self.body_height = height;
            for point in self.body_points.iter_mut() {
                point[2] = height;
            }
        }
        Ok(())
    }

    fn set_attitude(&mut self, roll: i32, pitch: i32, yaw: i32) -> Result<(), ActuationError> {
        let [roll, pitch, yaw] =
            [roll, pitch, yaw].map(|v| f64::from(restrict_value(v, -MAX_ATTITUDE, MAX_ATTITUDE)));
        info!("Attitude: roll={}, pitch={}, yaw={}", roll, pitch, yaw);

        let points = calculate_posture_balance(roll, pitch, yaw, self.body_height);
        self.commit_legs(transform_coordinates(&points))?;
        Ok(())
    }

    /// Hold the body level from IMU feedback until another command arrives
    fn balance(&mut self) -> Result<(), ControlError> {
        info!("Balance mode started");
        self.set_status(ControlStatus::Balancing);
        self.roll_pid.reset();
        self.pitch_pid.reset();

        let level = calculate_posture_balance(0.0, 0.0, 0.0, self.body_height);
        self.commit_legs(transform_coordinates(&level))?;

        let (before_zero, after_zero) = self.config.balance_settle;
        if self.ctx.slot.wait(before_zero) {
            return Ok(());
        }
        self.sensor.zero()?;
        if self.ctx.slot.wait(after_zero) {
            return Ok(());
        }

        while !self.ctx.slot.wait(self.config.balance_period) {
            let (roll, pitch, _) = self.sensor.attitude()?;
            let roll = self.roll_pid.update(roll);
            let pitch = self.pitch_pid.update(pitch);
            debug!("balance correction roll={:.3}, pitch={:.3}", roll, pitch);

            let points = calculate_posture_balance(roll, pitch, 0.0, self.body_height);
            self.commit_legs(transform_coordinates(&points))?;
        }
        info!("Balance mode ended");
        Ok(())
    }

    fn calibrate(&mut self, seq: u64, sub: CalibrationCommand) -> Result<(), ControlError> {
        if !self.ctx.state.calibration_mode() {
            warn!("Ignoring calibration command: not in calibration mode");
            self.ctx.slot.clear_if(seq);
            return Ok(());
        }

        // No auto-relax while a leg is being adjusted
        self.ctx.slot.disarm_timer();
        self.calibration.recompute();
        self.commit_legs(neutral_stance())?;

        match sub {
            CalibrationCommand::Refresh => {}
            CalibrationCommand::SetLeg { leg, point } => {
                if self.calibration.set_leg(leg, point) {
                    info!("Leg {} calibration target set to {:?}", leg, point);
                    self.commit_legs(neutral_stance())?;
                } else {
                    warn!("No leg {} to calibrate", leg);
                }
            }
            CalibrationCommand::Save => self.store.save(self.calibration.points())?,
        }

        self.ctx.slot.clear_if(seq);
        self.publish();
        Ok(())
    }

    fn toggle_relax(&mut self) -> Result<(), ActuationError> {
        if self.ctx.state.toggle_relaxed() {
            info!("Relax");
            self.sink.relax()?;
            self.status = ControlStatus::Idle;
        } else {
            info!("Unrelax");
            write_legs(&mut *self.sink, &self.joint_angles)?;
        }
        self.publish();
        Ok(())
    }

    fn auto_relax_due(&self) -> bool {
        self.config.auto_relax
            && self.ctx.slot.is_empty()
            && self
                .ctx
                .slot
                .last_command_at()
                .is_some_and(|at| at.elapsed() > self.config.auto_relax_after)
    }

    fn auto_relax(&mut self) {
        info!(
            "No command for {:?}, relaxing servos",
            self.config.auto_relax_after
        );
        if let Err(e) = self.sink.relax() {
            error!("Auto-relax failed: {}", e);
        }
        self.ctx.state.set_servo_relaxed(true);
        self.set_status(ControlStatus::Idle);
        self.ctx.slot.touch();
    }

    /// Actuate a candidate set of leg-local positions
    ///
    /// Returns Ok(false) without touching anything if servo power is off or
    /// any leg would leave the reachable shell; the previous pose stays.
    fn commit_legs(&mut self, candidate: [Point; LEG_COUNT]) -> Result<bool, ActuationError> {
        if self.ctx.state.servo_off() {
            debug!("Servo power off, leg update suppressed");
            return Ok(false);
        }

        let out_of_reach = candidate
            .iter()
            .map(leg_length)
            .enumerate()
            .find(|(_, length)| !(MIN_LEG_REACH..=MAX_LEG_REACH).contains(length));
        if let Some((leg, length)) = out_of_reach {
            warn!(
                "Leg {} target out of range ({:.1} mm), keeping previous pose",
                leg, length
            );
            return Ok(false);
        }

        let raw = candidate.map(|point| raw_leg_angles(&point));
        let angles = servo_angles(&raw, self.calibration.offsets());
        write_legs(&mut *self.sink, &angles)?;
        // Servos hold a pose again
        self.ctx.state.set_servo_relaxed(false);

        self.legs = candidate;
        self.joint_angles = angles;
        self.publish();
        Ok(true)
    }

    fn set_status(&mut self, status: ControlStatus) {
        self.status = status;
        self.publish();
    }

    fn snapshot(&self) -> LegSnapshot {
        LegSnapshot {
            status: self.status,
            relaxed: self.ctx.state.servo_relaxed(),
            body_height: self.body_height,
            leg_positions: self.legs,
            joint_angles: self.joint_angles,
            calibration_points: *self.calibration.points(),
            calibration_offsets: *self.calibration.offsets(),
        }
    }

    fn publish(&self) {
        self.ctx.publish(self.snapshot());
    }
}

impl LegDriver for Control {
    fn body_points(&self) -> [Point; LEG_COUNT] {
        self.body_points
    }

    fn body_height(&self) -> f64 {
        self.body_height
    }

    fn apply_body_points(&mut self, points: &[Point; LEG_COUNT]) -> Result<(), ActuationError> {
        self.commit_legs(transform_coordinates(points))?;
        Ok(())
    }
}

/// Owner of the running control thread; stops and joins it on drop
pub struct ControlHandle {
    ctx: Arc<RobotContext>,
    thread: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn context(&self) -> &Arc<RobotContext> {
        &self.ctx
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.ctx.request_stop();
        if thread.join().is_err() {
            error!("Control thread panicked");
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wait for the slot to drain, up to `timeout`
pub fn wait_idle(ctx: &RobotContext, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !ctx.slot.is_empty() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuation::{RecordingSink, ServoEvent};
    use crate::motion::{GaitId, GaitRequest};
    use crate::sensor::ScriptedSensor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Harness {
        control: Control,
        ctx: Arc<RobotContext>,
        sink: RecordingSink,
        dir: TempDir,
    }

    fn test_config(dir: &TempDir) -> ControlConfig {
        ControlConfig {
            frame_delay: Duration::ZERO,
            balance_settle: (Duration::ZERO, Duration::ZERO),
            balance_period: Duration::ZERO,
            calibration_path: dir.path().join("point.txt"),
            ..Default::default()
        }
    }

    fn harness_with(
        tweak: impl FnOnce(&mut ControlConfig),
        sensor: Box<dyn AttitudeSensor>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        tweak(&mut config);
        let ctx = Arc::new(RobotContext::new());
        let sink = RecordingSink::new();
        let control = Control::new(Arc::clone(&ctx), config, Box::new(sink.clone()), sensor);
        Harness {
            control,
            ctx,
            sink,
            dir,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {}, Box::new(ScriptedSensor::default()))
    }

    fn assert_reachable(legs: &[Point; LEG_COUNT]) {
        for (leg, point) in legs.iter().enumerate() {
            let length = leg_length(point);
            assert!(
                (MIN_LEG_REACH..=MAX_LEG_REACH).contains(&length),
                "leg {leg} length {length}"
            );
        }
    }

    #[test]
    fn test_stand_writes_neutral_pose() {
        let mut h = harness();
        h.control.stand().unwrap();
        assert_eq!(h.sink.frames(), 1);

        let snapshot = h.ctx.snapshot();
        assert_eq!(snapshot.leg_positions, neutral_stance());
        assert_eq!(snapshot.joint_angles[0], [90, 157, 116]);
        assert_eq!(snapshot.joint_angles[3], [90, 23, 64]);
    }

    #[test]
    fn test_empty_slot_does_nothing() {
        let mut h = harness();
        assert!(!h.control.poll_once());
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn test_position_stays_in_reach() {
        let mut h = harness();
        h.ctx.submit(Command::Position { x: 10, y: -5, z: 0 });
        assert!(h.control.poll_once());

        assert!(h.ctx.slot.is_empty());
        assert_eq!(h.sink.frames(), 1);
        let snapshot = h.ctx.snapshot();
        assert_eq!(snapshot.status, ControlStatus::Position);
        assert_eq!(snapshot.body_height, -30.0);
        assert_reachable(&snapshot.leg_positions);
    }

    #[test]
    fn test_position_clamps_height() {
        let mut h = harness();
        h.ctx.submit(Command::Position { x: 0, y: 0, z: 50 });
        h.control.poll_once();
        assert_eq!(h.ctx.snapshot().body_height, POSITION_BASE_HEIGHT - 20.0);
    }

    #[test]
    fn test_unreachable_position_keeps_previous_pose() {
        let mut h = harness();
        h.ctx.submit(Command::Position { x: 10, y: -5, z: 0 });
        h.control.poll_once();
        let before = h.ctx.snapshot();

        // Leg 3 would end up closer than the minimum reach
        h.ctx.submit(Command::Position {
            x: -40,
            y: -40,
            z: -20,
        });
        assert!(h.control.poll_once());

        assert!(h.ctx.slot.is_empty());
        assert_eq!(h.sink.frames(), 1);
        let after = h.ctx.snapshot();
        assert_eq!(after.leg_positions, before.leg_positions);
        assert_eq!(after.joint_angles, before.joint_angles);
        assert_eq!(after.body_height, -30.0);
    }

    #[test]
    fn test_attitude_is_clamped() {
        let mut h = harness();
        h.ctx.submit(Command::Attitude {
            roll: 40,
            pitch: -3,
            yaw: 0,
        });
        h.control.poll_once();

        let expected = transform_coordinates(&calculate_posture_balance(15.0, -3.0, 0.0, -25.0));
        assert_eq!(h.control.legs(), &expected);
        assert_eq!(h.control.status(), ControlStatus::Attitude);
    }

    #[test]
    fn test_neutral_move_pushes_exactly_one_update() {
        let mut h = harness();
        h.ctx.submit(Command::stop());
        assert!(h.control.poll_once());
        assert_eq!(h.sink.frames(), 1);
        assert!(h.ctx.slot.is_empty());
        assert!(!h.control.poll_once());
        assert_eq!(h.sink.frames(), 1);
    }

    #[test]
    fn test_only_latest_move_is_realized() {
        let mut h = harness();
        // 45-frame wave (42 updates) is overwritten by a 22-frame tripod
        h.ctx
            .submit(Command::Move(GaitRequest::new(GaitId::Wave, 35, 0, 10, 0)));
        h.ctx
            .submit(Command::Move(GaitRequest::new(GaitId::Tripod, 0, 20, 10, 0)));

        assert!(h.control.poll_once());
        assert_eq!(h.sink.frames(), 22);
        assert!(h.ctx.slot.is_empty());
        assert_eq!(h.control.status(), ControlStatus::Moving);
        assert!(!h.control.poll_once());
    }

    #[test]
    fn test_continuous_gait_keeps_move() {
        let mut h = harness_with(|c| c.retain_move = true, Box::new(ScriptedSensor::default()));
        h.ctx
            .submit(Command::Move(GaitRequest::new(GaitId::Tripod, 0, 20, 10, 0)));
        h.control.poll_once();
        h.control.poll_once();
        assert_eq!(h.sink.frames(), 44);
        assert!(!h.ctx.slot.is_empty());

        // A neutral move is still one-shot
        h.ctx.submit(Command::stop());
        h.control.poll_once();
        assert!(h.ctx.slot.is_empty());
    }

    #[test]
    fn test_continuous_gait_turn_in_place_is_one_shot() {
        let mut h = harness_with(|c| c.retain_move = true, Box::new(ScriptedSensor::default()));
        h.ctx
            .submit(Command::Move(GaitRequest::new(GaitId::Tripod, 0, 0, 10, 10)));
        assert!(h.control.poll_once());

        assert!(h.ctx.slot.is_empty());
        assert_eq!(h.sink.frames(), 22);
        assert_eq!(h.control.status(), ControlStatus::Moving);
        assert!(!h.control.poll_once());
    }

    #[test]
    fn test_out_of_reach_frames_are_skipped_mid_cycle() {
        let mut h = harness();
        // A 40 degree turn swings legs past full reach on frames 5..=8 only
        h.ctx
            .submit(Command::Move(GaitRequest::new(GaitId::Tripod, 0, 0, 10, 40)));
        assert!(h.control.poll_once());

        assert_eq!(h.sink.frames(), 18);
        assert!(h.ctx.slot.is_empty());
        assert_eq!(h.control.status(), ControlStatus::Moving);
        assert_reachable(h.control.legs());
    }

    #[test]
    fn test_gait_failure_clears_slot() {
        let mut h = harness();
        h.sink.fail_after(3);
        h.ctx
            .submit(Command::Move(GaitRequest::new(GaitId::Tripod, 10, 10, 10, 0)));

        assert!(h.control.poll_once());
        assert!(h.ctx.slot.is_empty());
        assert_eq!(h.sink.frames(), 3);
        assert_eq!(h.control.status(), ControlStatus::Idle);
        assert!(!h.control.poll_once());
    }

    #[test]
    fn test_servo_off_suppresses_everything() {
        let mut h = harness();
        h.ctx.state.set_servo_off(true);
        h.ctx.submit(Command::Position { x: 10, y: -5, z: 0 });

        assert!(!h.control.poll_once());
        assert!(!h.ctx.slot.is_empty());
        assert!(h.control.stand().is_ok());
        assert!(h.sink.events().is_empty());

        h.ctx.state.set_servo_off(false);
        assert!(h.control.poll_once());
        assert_eq!(h.sink.frames(), 1);
    }

    #[test]
    fn test_calibration_ignored_outside_calibration_mode() {
        let mut h = harness();
        h.ctx.submit(Command::Calibration(CalibrationCommand::SetLeg {
            leg: 1,
            point: [150, 5, -10],
        }));
        assert!(h.control.poll_once());
        assert!(h.ctx.slot.is_empty());
        assert!(h.sink.events().is_empty());
        assert_eq!(h.control.calibration(), &Calibration::default());
    }

    #[test]
    fn test_calibration_set_leg_and_save() {
        let mut h = harness();
        h.ctx.state.set_calibration_mode(true);
        h.ctx.submit(Command::Calibration(CalibrationCommand::SetLeg {
            leg: 1,
            point: [150, 5, -10],
        }));
        h.control.poll_once();

        let snapshot = h.ctx.snapshot();
        assert_eq!(snapshot.calibration_points[1], [150, 5, -10]);
        assert_ne!(snapshot.calibration_offsets[1], [0, 0, 0]);
        assert_eq!(snapshot.leg_positions, neutral_stance());
        assert_eq!(h.sink.frames(), 2);
        assert!(h.ctx.slot.last_command_at().is_none());

        h.ctx
            .submit(Command::Calibration(CalibrationCommand::Save));
        h.control.poll_once();
        let store = CalibrationStore::new(h.dir.path().join("point.txt"));
        assert_eq!(store.try_load().unwrap(), snapshot.calibration_points);
    }

    #[test]
    fn test_calibration_refresh_is_idempotent() {
        let mut h = harness();
        h.ctx.state.set_calibration_mode(true);
        h.ctx.submit(Command::Calibration(CalibrationCommand::SetLeg {
            leg: 4,
            point: [145, 8, -6],
        }));
        h.control.poll_once();
        let first = h.ctx.snapshot();

        for _ in 0..2 {
            h.ctx
                .submit(Command::Calibration(CalibrationCommand::Refresh));
            h.control.poll_once();
            let again = h.ctx.snapshot();
            assert_eq!(again.calibration_offsets, first.calibration_offsets);
            assert_eq!(again.joint_angles, first.joint_angles);
        }
    }

    #[test]
    fn test_relax_toggles() {
        let mut h = harness();
        h.control.stand().unwrap();
        let standing = h.sink.last_frame();

        h.ctx.submit(Command::Relax);
        h.control.poll_once();
        assert_eq!(h.sink.events().last(), Some(&ServoEvent::Relax));
        assert!(h.ctx.state.servo_relaxed());
        assert!(h.ctx.snapshot().relaxed);

        h.ctx.submit(Command::Relax);
        h.control.poll_once();
        assert!(!h.ctx.state.servo_relaxed());
        assert_eq!(h.sink.frames(), 2);
        assert_eq!(h.sink.last_frame(), standing);
    }

    #[test]
    fn test_auto_relax_after_quiet_period() {
        let mut h = harness_with(
            |c| {
                c.auto_relax = true;
                c.auto_relax_after = Duration::from_millis(1);
            },
            Box::new(ScriptedSensor::default()),
        );
        // Never armed before the first command
        assert!(!h.control.poll_once());

        h.ctx.submit(Command::Position { x: 0, y: 0, z: 0 });
        h.control.poll_once();
        thread::sleep(Duration::from_millis(5));

        assert!(h.control.poll_once());
        assert_eq!(h.sink.events().last(), Some(&ServoEvent::Relax));
        assert!(h.ctx.state.servo_relaxed());
        assert_eq!(h.control.status(), ControlStatus::Idle);
    }

    #[test]
    fn test_relax_works_after_auto_relax_and_new_pose() {
        let mut h = harness_with(
            |c| {
                c.auto_relax = true;
                c.auto_relax_after = Duration::from_millis(1);
            },
            Box::new(ScriptedSensor::default()),
        );
        h.ctx.submit(Command::Position { x: 0, y: 0, z: 0 });
        h.control.poll_once();
        thread::sleep(Duration::from_millis(5));
        assert!(h.control.poll_once());
        assert!(h.ctx.state.servo_relaxed());

        // Driving the servos again means they are no longer relaxed
        h.ctx.submit(Command::Position { x: 5, y: 0, z: 0 });
        h.control.poll_once();
        assert!(!h.ctx.state.servo_relaxed());

        h.ctx.submit(Command::Relax);
        h.control.poll_once();
        assert_eq!(h.sink.events().last(), Some(&ServoEvent::Relax));
        assert!(h.ctx.state.servo_relaxed());
    }

    #[test]
    fn test_auto_relax_waits_for_empty_slot() {
        let mut h = harness_with(
            |c| {
                c.auto_relax = true;
                c.auto_relax_after = Duration::from_millis(1);
                c.retain_move = true;
            },
            Box::new(ScriptedSensor::default()),
        );
        h.ctx
            .submit(Command::Move(GaitRequest::new(GaitId::Tripod, 0, 20, 10, 0)));
        h.control.poll_once();
        thread::sleep(Duration::from_millis(5));

        // The retained move keeps walking instead of relaxing
        assert!(h.control.poll_once());
        assert_eq!(h.sink.frames(), 44);
        assert!(!h.sink.events().contains(&ServoEvent::Relax));
        assert!(!h.ctx.state.servo_relaxed());
    }

    #[test]
    fn test_auto_relax_disabled_by_default() {
        let mut h = harness_with(
            |c| c.auto_relax_after = Duration::from_millis(1),
            Box::new(ScriptedSensor::default()),
        );
        h.ctx.submit(Command::Position { x: 0, y: 0, z: 0 });
        h.control.poll_once();
        thread::sleep(Duration::from_millis(5));
        assert!(!h.control.poll_once());
    }

    /// Replays readings and queues a command once they run out
    struct InterruptingSensor {
        readings: Vec<(f64, f64, f64)>,
        reads: Arc<AtomicUsize>,
        zeroed: Arc<AtomicUsize>,
        ctx: Arc<RobotContext>,
    }

    impl AttitudeSensor for InterruptingSensor {
        fn attitude(&mut self) -> Result<(f64, f64, f64), SensorError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if n + 1 >= self.readings.len() {
                self.ctx.submit(Command::Balance(false));
            }
            Ok(self.readings[n.min(self.readings.len() - 1)])
        }

        fn zero(&mut self) -> Result<(), SensorError> {
            self.zeroed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_balance_runs_until_next_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(RobotContext::new());
        let sink = RecordingSink::new();
        let reads = Arc::new(AtomicUsize::new(0));
        let zeroed = Arc::new(AtomicUsize::new(0));
        let sensor = InterruptingSensor {
            readings: vec![(4.0, -2.0, 0.0), (3.0, -1.0, 0.0), (1.0, 0.0, 0.0)],
            reads: Arc::clone(&reads),
            zeroed: Arc::clone(&zeroed),
            ctx: Arc::clone(&ctx),
        };
        let mut control = Control::new(
            Arc::clone(&ctx),
            test_config(&dir),
            Box::new(sink.clone()),
            Box::new(sensor),
        );

        ctx.submit(Command::Balance(true));
        assert!(control.poll_once());

        assert_eq!(zeroed.load(Ordering::SeqCst), 1);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        // Level pose plus one correction per reading
        assert_eq!(sink.frames(), 4);
        assert_eq!(control.status(), ControlStatus::Balancing);

        // The interrupting command is served next
        assert_eq!(ctx.slot.peek().map(|(_, c)| c), Some(Command::Balance(false)));
        assert!(control.poll_once());
        assert!(ctx.slot.is_empty());
        assert_reachable(control.legs());
    }

    #[test]
    fn test_balance_without_imu_is_dropped() {
        let mut h = harness_with(|_| {}, Box::new(ScriptedSensor::default()));
        h.ctx.submit(Command::Balance(true));
        assert!(h.control.poll_once());
        // Level pose went out, then the sensor error ended the loop
        assert_eq!(h.sink.frames(), 1);
        assert_eq!(h.control.status(), ControlStatus::Idle);
        assert!(h.ctx.slot.is_empty());
    }

    #[test]
    fn test_spawned_loop_serves_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(RobotContext::new());
        let sink = RecordingSink::new();
        let control = Control::new(
            Arc::clone(&ctx),
            test_config(&dir),
            Box::new(sink.clone()),
            Box::new(ScriptedSensor::default()),
        );
        let handle = control.spawn().unwrap();

        handle.context().submit(Command::Position { x: 10, y: -5, z: 0 });
        assert!(wait_idle(&ctx, Duration::from_secs(5)));
        handle.stop();

        // Stand-up plus the position update
        assert_eq!(sink.frames(), 2);
        assert!(ctx.stop_requested());
        println!("final snapshot: {:?}", ctx.snapshot());
    }
}
