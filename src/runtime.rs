// Bus bridge around the control thread
//
// - Wire commands and routine names arrive on TOPIC_CMD
// - IMU samples arrive on TOPIC_IMU and feed the balance loop
// - Servo frames go out on TOPIC_SERVOS (from the control thread)
// - Status is published on TOPIC_STATUS at LOOP_HZ

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::actuation::{BusServoSink, LogSink, ServoSink};
use crate::command::{Command, WireCommand};
use crate::config::{ControlConfig, LOOP_HZ, TOPIC_CMD, TOPIC_IMU, TOPIC_SERVOS, TOPIC_STATUS};
use crate::control::{Control, RobotContext};
use crate::messages::{ImuSample, StatusReport};
use crate::routines::{Routine, Routines};
use crate::sensor::SharedImu;

/// Process-level options
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub control: ControlConfig,
    /// Log servo writes instead of publishing them
    pub dry_run: bool,
}

/// Turns incoming text frames into slot commands, flag changes or routines
pub struct CommandIngest {
    ctx: Arc<RobotContext>,
    routines: Routines,
}

impl CommandIngest {
    pub fn new(ctx: Arc<RobotContext>, routines: Routines) -> Self {
        Self { ctx, routines }
    }

    pub fn handle(&self, text: &str) {
        let text = text.trim();

        if let Ok(routine) = text.parse::<Routine>() {
            // Routine threads run detached
            if let Err(e) = self.routines.start(routine) {
                error!("Failed to start {}: {}", routine, e);
            }
            return;
        }

        match text.parse::<WireCommand>() {
            Ok(WireCommand::ServoPower(on)) => self.ctx.state.set_servo_off(!on),
            Ok(WireCommand::Control(command)) => {
                if matches!(command, Command::Move(_)) && self.ctx.state.motion_active() {
                    debug!("Manual move overrides the running routine");
                    self.ctx.state.set_motion_active(false);
                }
                info!("Received command: {}", command);
                self.ctx.submit(command);
            }
            Err(e) => warn!("Failed to parse command {:?}: {}", text, e),
        }
    }

    /// Stop moving and cut servo power
    pub fn shutdown(&self) {
        self.routines.shutdown();
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD).await?;
    let sub_imu = session.declare_subscriber(TOPIC_IMU).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;

    let sink: Box<dyn ServoSink> = if options.dry_run {
        info!("Dry run: servo writes are only logged");
        Box::new(LogSink::default())
    } else {
        Box::new(BusServoSink::new(
            session.declare_publisher(TOPIC_SERVOS).await?,
        ))
    };

    let imu = SharedImu::new();
    let ctx = Arc::new(RobotContext::new());
    let control = Control::new(
        Arc::clone(&ctx),
        options.control,
        sink,
        Box::new(imu.clone()),
    );
    let handle = control.spawn()?;
    let ingest = CommandIngest::new(Arc::clone(&ctx), Routines::new(Arc::clone(&ctx)));

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Runtime started: {}Hz status loop", LOOP_HZ);
    info!("Subscribed to: {}, {}", TOPIC_CMD, TOPIC_IMU);
    info!("Publishing to: {}, {}", TOPIC_SERVOS, TOPIC_STATUS);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down...");
                break;
            }
            _ = tick.tick() => {}
        }

        // 1. Drain pending commands in arrival order
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            match std::str::from_utf8(&payload) {
                Ok(text) => ingest.handle(text),
                Err(e) => warn!("Command is not UTF-8: {}", e),
            }
        }

        // 2. Keep the latest IMU sample
        while let Ok(Some(sample)) = sub_imu.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ImuSample>(&payload) {
                Ok(imu_sample) => imu.update(imu_sample),
                Err(e) => warn!("Failed to parse IMU sample: {}", e),
            }
        }

        // 3. Publish status
        let snapshot = ctx.snapshot();
        let modes = ctx.state.modes();
        let report = StatusReport {
            servo_off: modes.servo_off,
            calibration_mode: modes.calibration_mode,
            motion_active: modes.motion_active,
            legs: &snapshot,
        };
        pub_status.put(serde_json::to_string(&report)?).await?;
    }

    ingest.shutdown();
    tokio::task::spawn_blocking(move || handle.stop()).await?;
    info!("Runtime stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CalibrationCommand;
    use crate::motion::{GaitId, GaitRequest};

    fn ingest() -> (CommandIngest, Arc<RobotContext>) {
        let ctx = Arc::new(RobotContext::new());
        let routines =
            Routines::with_timing(Arc::clone(&ctx), Duration::from_millis(1), Duration::from_millis(1));
        (CommandIngest::new(Arc::clone(&ctx), routines), ctx)
    }

    #[test]
    fn test_wire_command_lands_in_slot() {
        let (ingest, ctx) = ingest();
        ingest.handle("CMD_POSITION#10#-5#0\n");
        assert_eq!(
            ctx.slot.peek().map(|(_, c)| c),
            Some(Command::Position { x: 10, y: -5, z: 0 })
        );
    }

    #[test]
    fn test_malformed_command_leaves_slot_alone() {
        let (ingest, ctx) = ingest();
        ingest.handle("CMD_MOVE#1#0#35#8#0");
        ingest.handle("CMD_MOVE#1#0#35");
        ingest.handle("garbage");
        assert_eq!(
            ctx.slot.peek().map(|(_, c)| c),
            Some(Command::Move(GaitRequest::new(GaitId::Tripod, 0, 35, 8, 0)))
        );
    }

    #[test]
    fn test_servo_power_sets_flag_only() {
        let (ingest, ctx) = ingest();
        ingest.handle("CMD_SERVOPOWER#0");
        assert!(ctx.state.servo_off());
        assert!(ctx.slot.is_empty());
        ingest.handle("CMD_SERVOPOWER#1");
        assert!(!ctx.state.servo_off());
    }

    #[test]
    fn test_manual_move_cancels_routine() {
        let (ingest, ctx) = ingest();
        ctx.state.set_motion_active(true);
        ingest.handle("CMD_MOVE#2#0#0#8#0");
        assert!(!ctx.state.motion_active());
    }

    #[test]
    fn test_routine_names_start_routines() {
        let (ingest, ctx) = ingest();
        ingest.handle("sys_prep_calibration");
        assert!(ctx.state.calibration_mode());
        assert_eq!(
            ctx.slot.peek().map(|(_, c)| c),
            Some(Command::Calibration(CalibrationCommand::Refresh))
        );

        ingest.handle("sys_shutdown");
        assert!(ctx.state.servo_off());
        assert_eq!(ctx.slot.peek().map(|(_, c)| c), Some(Command::stop()));
    }
}
