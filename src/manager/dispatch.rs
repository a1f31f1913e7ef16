//! Wake-up scheduling for the state machine.
//!
//! The machine is driven by a single one-shot, delayable wake-up. Two
//! dispatch variants exist:
//!
//! * [`DispatchMode::Timer`] — the wake-up thread runs the step itself.
//! * [`DispatchMode::Task`] — the wake-up thread re-arms itself at the
//!   regular tick rate and sets the trigger flag; a dedicated worker thread
//!   waits on the flag and runs the step. Use this to keep step work out of
//!   the timer context.
//!
//! Both variants share one step body and one `wake_soon`-style primitive,
//! [`WakeTimer::arm`].

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::error;

use crate::error::{Error, Result};
use crate::events::{BIT_SHUTDOWN, BIT_TRIGGER};

use super::machine;
use super::Shared;

/// Where the state machine step executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Step directly in the wake-up thread.
    #[default]
    Timer,
    /// Step in a dedicated worker task woken through the trigger flag.
    Task,
}

struct WakeState {
    deadline: Option<Instant>,
    shutdown: bool,
}

/// One-shot delayable wake-up. Arming replaces any pending deadline, like
/// re-scheduling a one-shot timer.
pub(crate) struct WakeTimer {
    state: Mutex<WakeState>,
    cond: Condvar,
}

impl WakeTimer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(WakeState {
                deadline: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Schedule the next wake-up `delay` from now, replacing any pending one.
    pub(crate) fn arm(&self, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state.deadline = Some(Instant::now() + delay);
        self.cond.notify_all();
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        self.cond.notify_all();
    }

    /// Block until the armed deadline passes (true) or shutdown (false).
    fn wait_fire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutdown {
                return false;
            }
            match state.deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.deadline = None;
                        return true;
                    }
                    let (next, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
                    state = next;
                }
                None => {
                    state = self.cond.wait(state).unwrap();
                }
            }
        }
    }
}

/// Spawn the wake-up thread. Runs until [`WakeTimer::shutdown`].
pub(crate) fn spawn_timer(shared: Arc<Shared>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("wmngr-timer".into())
        .spawn(move || {
            while shared.timer.wait_fire() {
                match shared.dispatch {
                    DispatchMode::Timer => machine::step(&shared),
                    DispatchMode::Task => {
                        // Keep the regular tick running and hand the step
                        // over to the worker.
                        shared.timer.arm(shared.timing.cfg_ticks);
                        shared.flags.set(BIT_TRIGGER);
                    }
                }
            }
        })
        .map_err(|err| {
            error!("manager: Creating wake-up thread failed: {}", err);
            Error::NoMemory
        })
}

/// Spawn the worker task for [`DispatchMode::Task`].
pub(crate) fn spawn_worker(shared: Arc<Shared>, stack_size: usize) -> Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name("wmngr-task".into());
    if stack_size > 0 {
        builder = builder.stack_size(stack_size);
    }
    builder
        .spawn(move || loop {
            let bits = shared.flags.wait_any(BIT_TRIGGER | BIT_SHUTDOWN);
            if bits & BIT_SHUTDOWN != 0 {
                return;
            }
            shared.flags.clear(BIT_TRIGGER);
            machine::step(&shared);
        })
        .map_err(|err| {
            error!("manager: Creating worker task failed: {}", err);
            Error::NoMemory
        })
}
