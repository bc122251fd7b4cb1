use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::driver::Driver;

#[derive(Debug, Default)]
struct MonitorState {
    /// A wake has been posted to the driver and has not run yet
    triggered: bool,
    /// Worker parties currently taking turns with the driver
    registered: usize,
    /// Ticket handed to the next party that blocks
    next_ticket: u64,
    /// Tickets below this value have been woken
    released: u64,
}

/// Point-in-time view of a monitor, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub registered: usize,
    pub triggered: bool,
    /// Parties currently blocked waiting for their turn
    pub waiting: u64,
}

/// Baton-passing monitor shared by one driver and its worker parties.
///
/// At any instant at most one party holds the turn; everyone else is blocked
/// in [`pass`](Self::pass). Blocked parties are woken in the order they
/// started waiting, and a condvar wakeup only counts once the waker has
/// released that party's ticket.
pub struct RendezvousMonitor {
    state: Mutex<MonitorState>,
    turn: Condvar,
    driver: Arc<dyn Driver>,
}

impl RendezvousMonitor {
    pub fn new(driver: Arc<dyn Driver>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MonitorState::default()),
            turn: Condvar::new(),
            driver,
        })
    }

    /// Join the rendezvous group and wait for the driver to hand over the turn.
    pub fn register(self: &Arc<Self>) {
        let mut state = self.lock();
        state.registered += 1;
        self.schedule_wake_locked(&mut state);
        let _state = self.pass_locked(state);
    }

    /// Leave the rendezvous group, waking whoever is blocked.
    pub fn unregister(&self) {
        let mut state = self.lock();
        match state.registered.checked_sub(1) {
            Some(n) => state.registered = n,
            None => tracing::warn!("unregister() called with no registered party"),
        }
        self.release_one(&mut state);
    }

    /// Wake one blocked party, then block until woken in turn.
    pub fn pass(&self) {
        let state = self.lock();
        let _state = self.pass_locked(state);
    }

    /// Arrange for the driver to call `pass()` once.
    ///
    /// Coalesced: further calls before the posted wake has run do nothing.
    /// Does nothing when no party is registered.
    pub fn schedule_wake(self: &Arc<Self>) {
        let mut state = self.lock();
        self.schedule_wake_locked(&mut state);
    }

    /// Give up the turn for `duration` while staying out of the group.
    pub fn sleep(self: &Arc<Self>, duration: Duration) {
        self.unregister();
        thread::sleep(duration);
        self.register();
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let state = self.lock();
        MonitorSnapshot {
            registered: state.registered,
            triggered: state.triggered,
            waiting: state.next_ticket - state.released,
        }
    }

    fn schedule_wake_locked(self: &Arc<Self>, state: &mut MonitorState) {
        if state.triggered || state.registered == 0 {
            return;
        }
        state.triggered = true;
        let monitor = Arc::clone(self);
        self.driver.post(Box::new(move || monitor.run_scheduled_wake()));
    }

    fn run_scheduled_wake(&self) {
        let mut state = self.lock();
        state.triggered = false;
        if state.registered == 0 {
            // Every worker left after the wake was posted; blocking now would
            // leave the driver waiting for a turn nobody will hand back.
            tracing::trace!("Scheduled wake found no registered party");
            return;
        }
        let _state = self.pass_locked(state);
    }

    fn pass_locked<'a>(
        &'a self,
        mut state: MutexGuard<'a, MonitorState>,
    ) -> MutexGuard<'a, MonitorState> {
        self.release_one(&mut state);
        self.wait_turn(state)
    }

    fn release_one(&self, state: &mut MonitorState) {
        if state.released < state.next_ticket {
            state.released += 1;
            self.turn.notify_all();
        }
    }

    fn wait_turn<'a>(
        &'a self,
        mut state: MutexGuard<'a, MonitorState>,
    ) -> MutexGuard<'a, MonitorState> {
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.released <= ticket {
            state = match self.turn.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => {
                    tracing::warn!("Rendezvous wait interrupted, treating as spurious wake");
                    poisoned.into_inner()
                }
            };
        }
        state
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Rendezvous monitor poisoned, recovering state");
            poisoned.into_inner()
        })
    }
}

impl std::fmt::Debug for RendezvousMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousMonitor")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}
