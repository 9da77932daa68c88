// Motion routines built on top of the command slot
//
// Walking routines resubmit their Move while the motion flag holds, checking
// the flag every slice; they always end with a neutral stop Move. Turns are a
// fixed three-step Move sequence.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::{CalibrationCommand, Command};
use crate::config::{ROUTINE_SLICE, ROUTINE_SLICES_PER_MOVE};
use crate::control::RobotContext;
use crate::motion::{GaitId, GaitRequest};

/// Pause between the steps of a turn
pub const TURN_PAUSE: Duration = Duration::from_secs(1);

/// Rotation per turn step (degrees)
const TURN_ANGLE: i32 = 6;
const TURN_SPEED: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Back,
    Left,
    Right,
}

impl Direction {
    /// Per-cycle translation for a step of `step` mm
    fn step(self, step: i32) -> (i32, i32) {
        match self {
            Direction::Forward => (0, step),
            Direction::Back => (0, -step),
            Direction::Left => (-step, 0),
            Direction::Right => (step, 0),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Back => "back",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {
    /// Wave gait, long steps
    March(Direction),
    /// Tripod gait, short fast steps
    Run(Direction),
    TurnLeft,
    TurnRight,
    StopMotion,
    Shutdown,
    EnterCalibration,
    ExitCalibration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown routine {0:?}")]
pub struct UnknownRoutine(pub String);

impl FromStr for Routine {
    type Err = UnknownRoutine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let walk = |rest: &str| match rest {
            "forward" => Some(Direction::Forward),
            "back" => Some(Direction::Back),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        };

        let routine = if let Some(rest) = s.strip_prefix("routine_march_") {
            walk(rest).map(Routine::March)
        } else if let Some(rest) = s.strip_prefix("routine_run_") {
            walk(rest).map(Routine::Run)
        } else {
            match s {
                "routine_turn_left" => Some(Routine::TurnLeft),
                "routine_turn_right" => Some(Routine::TurnRight),
                "sys_stop_motion" => Some(Routine::StopMotion),
                "sys_shutdown" => Some(Routine::Shutdown),
                "sys_prep_calibration" => Some(Routine::EnterCalibration),
                "sys_exit_calibration" => Some(Routine::ExitCalibration),
                _ => None,
            }
        };
        routine.ok_or_else(|| UnknownRoutine(s.to_string()))
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Routine::March(d) => write!(f, "routine_march_{}", d.as_str()),
            Routine::Run(d) => write!(f, "routine_run_{}", d.as_str()),
            Routine::TurnLeft => f.write_str("routine_turn_left"),
            Routine::TurnRight => f.write_str("routine_turn_right"),
            Routine::StopMotion => f.write_str("sys_stop_motion"),
            Routine::Shutdown => f.write_str("sys_shutdown"),
            Routine::EnterCalibration => f.write_str("sys_prep_calibration"),
            Routine::ExitCalibration => f.write_str("sys_exit_calibration"),
        }
    }
}

impl Routine {
    /// The Move a walking routine keeps resubmitting
    pub fn gait_request(&self) -> Option<GaitRequest> {
        match *self {
            Routine::March(direction) => {
                let (x, y) = direction.step(35);
                Some(GaitRequest::new(GaitId::Wave, x, y, 8, 0))
            }
            Routine::Run(direction) => {
                let (x, y) = direction.step(20);
                Some(GaitRequest::new(GaitId::Tripod, x, y, 10, 0))
            }
            _ => None,
        }
    }
}

/// Starts routines against a robot context
pub struct Routines {
    ctx: Arc<RobotContext>,
    /// Bumped by every walking routine start; older loops see it and exit.
    /// Held while the motion flag changes hands.
    generation: Arc<Mutex<u64>>,
    slice: Duration,
    slices_per_move: u32,
    turn_pause: Duration,
}

impl Routines {
    pub fn new(ctx: Arc<RobotContext>) -> Self {
        Self::with_timing(ctx, ROUTINE_SLICE, TURN_PAUSE)
    }

    pub fn with_timing(ctx: Arc<RobotContext>, slice: Duration, turn_pause: Duration) -> Self {
        Self {
            ctx,
            generation: Arc::new(Mutex::new(0)),
            slice,
            slices_per_move: ROUTINE_SLICES_PER_MOVE,
            turn_pause,
        }
    }

    /// Run a routine; walking and turning run on their own thread
    pub fn start(&self, routine: Routine) -> std::io::Result<Option<JoinHandle<()>>> {
        info!("Routine: {}", routine);
        if let Some(request) = routine.gait_request() {
            return self.start_walk(routine, request).map(Some);
        }

        match routine {
            Routine::TurnLeft => self.start_turn(-TURN_ANGLE).map(Some),
            Routine::TurnRight => self.start_turn(TURN_ANGLE).map(Some),
            Routine::StopMotion => {
                self.stop_motion();
                Ok(None)
            }
            Routine::Shutdown => {
                self.shutdown();
                Ok(None)
            }
            Routine::EnterCalibration => {
                self.enter_calibration();
                Ok(None)
            }
            Routine::ExitCalibration => {
                self.exit_calibration();
                Ok(None)
            }
            Routine::March(_) | Routine::Run(_) => Ok(None),
        }
    }

    fn start_walk(&self, routine: Routine, request: GaitRequest) -> std::io::Result<JoinHandle<()>> {
        if self.ctx.state.motion_active() {
            warn!("Motion already active, replacing it with {}", routine);
        }
        let mine = {
            let mut generation = lock_generation(&self.generation);
            *generation += 1;
            self.ctx.state.set_motion_active(true);
            *generation
        };

        let walk = WalkLoop {
            ctx: Arc::clone(&self.ctx),
            generation: Arc::clone(&self.generation),
            mine,
            request,
            slice: self.slice,
            slices_per_move: self.slices_per_move,
        };
        thread::Builder::new()
            .name(routine.to_string())
            .spawn(move || walk.run())
    }

    fn start_turn(&self, angle: i32) -> std::io::Result<JoinHandle<()>> {
        let ctx = Arc::clone(&self.ctx);
        let pause = self.turn_pause;
        thread::Builder::new()
            .name("routine_turn".to_string())
            .spawn(move || {
                for (x, y, angle) in [(5, 5, angle), (-5, 0, angle), (0, 0, 0)] {
                    let request = GaitRequest::new(GaitId::Tripod, x, y, TURN_SPEED, angle);
                    debug!("turn step {}", Command::Move(request));
                    ctx.submit(Command::Move(request));
                    if angle != 0 {
                        thread::sleep(pause);
                    }
                }
            })
    }

    /// End any walking routine and re-seat the feet
    pub fn stop_motion(&self) {
        if self.ctx.state.motion_active() {
            info!("Stopping motion loop");
            self.ctx.state.set_motion_active(false);
            self.ctx.submit(Command::stop());
        } else {
            info!("Motion already inactive");
        }
    }

    /// Stop moving, then cut servo power
    pub fn shutdown(&self) {
        info!("Shutdown sequence triggered");
        self.ctx.state.set_motion_active(false);
        self.ctx.submit(Command::stop());
        self.ctx.state.set_servo_off(true);
    }

    pub fn enter_calibration(&self) {
        info!("Preparing robot for calibration");
        self.ctx.state.set_calibration_mode(true);
        self.ctx
            .submit(Command::Calibration(CalibrationCommand::Refresh));
    }

    pub fn exit_calibration(&self) {
        info!("Exiting calibration mode");
        self.ctx.state.set_calibration_mode(false);
    }
}

fn lock_generation(generation: &Mutex<u64>) -> MutexGuard<'_, u64> {
    generation.lock().unwrap_or_else(|e| e.into_inner())
}

struct WalkLoop {
    ctx: Arc<RobotContext>,
    generation: Arc<Mutex<u64>>,
    mine: u64,
    request: GaitRequest,
    slice: Duration,
    slices_per_move: u32,
}

impl WalkLoop {
    fn current(&self) -> bool {
        *lock_generation(&self.generation) == self.mine
    }

    fn active(&self) -> bool {
        self.ctx.state.motion_active() && self.current() && !self.ctx.stop_requested()
    }

    fn run(self) {
        let command = Command::Move(self.request);
        while self.active() {
            self.ctx.submit(command);
            for _ in 0..self.slices_per_move {
                if !self.active() {
                    break;
                }
                thread::sleep(self.slice);
            }
        }

        // A newer routine owns the flag and the slot now
        {
            let generation = lock_generation(&self.generation);
            if *generation != self.mine {
                debug!("Walk loop superseded");
                return;
            }
            self.ctx.state.set_motion_active(false);
        }

        thread::sleep(2 * self.slice);
        if !self.current() {
            debug!("Walk loop superseded before stopping");
            return;
        }
        self.ctx.submit(Command::stop());
        debug!("Walk loop finished");
    }
}
