use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tokio::time::{timeout_at, Instant};

use crate::driver::{Driver, Task};

/// Create a driver and the event loop that runs what it posts.
pub fn channel() -> (QueueDriver, EventLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueDriver { tx }, EventLoop { rx, turns: 0 })
}

/// Posts tasks onto an [`EventLoop`] owned by the controller.
#[derive(Debug, Clone)]
pub struct QueueDriver {
    tx: mpsc::UnboundedSender<Task>,
}

impl Driver for QueueDriver {
    fn post(&self, task: Task) {
        if self.tx.send(task).is_err() {
            // Event loop dropped; nobody is left to hand the turn to.
            tracing::debug!("Event loop closed, dropping posted task");
        }
    }
}

/// The controller's end of a [`QueueDriver`].
///
/// Running a task may block the calling thread until the worker hands the
/// turn back; that is what keeps the controller and the worker from running
/// job logic at the same time. On a multi-threaded runtime tasks run inside
/// [`tokio::task::block_in_place`] so other tasks move off the blocked
/// thread. On a current-thread runtime nothing else on that runtime makes
/// progress while a task runs; pump from a dedicated thread or runtime when
/// that matters.
pub struct EventLoop {
    rx: mpsc::UnboundedReceiver<Task>,
    turns: u64,
}

impl EventLoop {
    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Total number of tasks run so far
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Run the tasks that are queued right now. Tasks posted while draining
    /// are left for the next call. Returns the number of tasks run.
    pub fn drain(&mut self) -> usize {
        let queued = self.rx.len();
        let mut ran = 0;
        for _ in 0..queued {
            match self.rx.try_recv() {
                Ok(task) => {
                    self.run(task);
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }

    /// Wait for the next task and run it. Returns false once every driver is gone.
    pub async fn turn(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                self.run(task);
                true
            }
            None => false,
        }
    }

    /// Run tasks as they arrive for `duration`. Returns the number of tasks run.
    pub async fn pump_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        // A running worker re-posts before every hand-off, so the deadline is
        // checked explicitly rather than relying on the receive timing out.
        while Instant::now() < deadline {
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(task)) => {
                    self.run(task);
                    ran += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }
        ran
    }

    /// Run tasks until `done` holds or `timeout` expires. Returns whether `done` held.
    pub async fn pump_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(task)) => self.run(task),
                Ok(None) | Err(_) => return done(),
            }
        }
    }

    fn run(&mut self, task: Task) {
        self.turns += 1;
        let multi_thread = Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if multi_thread {
            block_in_place(task);
        } else {
            task();
        }
    }
}
