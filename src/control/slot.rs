// Single-slot command cell
//
// Producers overwrite whatever is pending (last write wins). Each submission
// gets a sequence number; the control loop only clears the slot if it still
// holds the command it just processed, so a command arriving mid-processing
// is served next instead of being wiped.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::command::Command;

#[derive(Debug, Default)]
struct SlotState {
    next_seq: u64,
    pending: Option<(u64, Command)>,
    last_command_at: Option<Instant>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct CommandSlot {
    state: Mutex<SlotState>,
    wakeup: Condvar,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the pending command, returning its sequence number
    pub fn submit(&self, command: Command) -> u64 {
        let mut state = self.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        if let Some((old, replaced)) = state.pending.replace((seq, command)) {
            debug!("Command #{} ({}) overwritten before processing", old, replaced);
        }
        state.last_command_at = Some(Instant::now());
        drop(state);

        self.wakeup.notify_all();
        seq
    }

    pub fn peek(&self) -> Option<(u64, Command)> {
        self.lock().pending
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_none()
    }

    /// Clear the slot if it still holds command `seq`
    pub fn clear_if(&self, seq: u64) -> bool {
        let mut state = self.lock();
        match state.pending {
            Some((pending, _)) if pending == seq => {
                state.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&self) {
        self.lock().pending = None;
    }

    /// When the last command was submitted, if the inactivity timer is armed
    pub fn last_command_at(&self) -> Option<Instant> {
        self.lock().last_command_at
    }

    /// Restart the inactivity timer from now
    pub fn touch(&self) {
        self.lock().last_command_at = Some(Instant::now());
    }

    /// Disarm the inactivity timer until the next submission
    pub fn disarm_timer(&self) {
        self.lock().last_command_at = None;
    }

    /// Wake every waiter and make future waits return immediately
    pub fn close(&self) {
        self.lock().closed = true;
        self.wakeup.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Block until a command is pending, the slot is closed, or `timeout` passes
    ///
    /// Returns true if woken by a command or by closing.
    pub fn wait(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .wakeup
            .wait_timeout_while(state, timeout, |s| s.pending.is_none() && !s.closed)
            .unwrap_or_else(|e| e.into_inner());
        state.pending.is_some() || state.closed
    }
}
