// Per-robot shared context handed to the control loop and its collaborators

use std::sync::{Mutex, MutexGuard};

use super::slot::CommandSlot;
use crate::command::Command;
use crate::messages::LegSnapshot;
use crate::state::RobotState;

/// Everything shared between the control thread, routines and the bus bridge
#[derive(Debug, Default)]
pub struct RobotContext {
    pub slot: CommandSlot,
    pub state: RobotState,
    snapshot: Mutex<LegSnapshot>,
}

impl RobotContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command for the control loop
    pub fn submit(&self, command: Command) -> u64 {
        self.slot.submit(command)
    }

    /// Latest published leg state; may lag the control thread by one update
    pub fn snapshot(&self) -> LegSnapshot {
        self.lock_snapshot().clone()
    }

    pub(super) fn publish(&self, snapshot: LegSnapshot) {
        *self.lock_snapshot() = snapshot;
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, LegSnapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask the control loop (and any balance sub-loop) to exit
    pub fn request_stop(&self) {
        self.slot.close();
    }

    pub fn stop_requested(&self) -> bool {
        self.slot.is_closed()
    }
}
