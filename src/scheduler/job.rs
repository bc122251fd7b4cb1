use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::driver::Driver;
use crate::error::{JobError, Result};
use crate::rendezvous::RendezvousMonitor;
use crate::simulation::Simulation;
use crate::worker::executor::{spawn_worker, WorkerHandle};

/// What the controller last asked the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// No worker, or a worker that has not been told anything yet
    Idle,
    /// Run one boundary-to-boundary unit, then pause
    Step,
    /// Keep running until told otherwise
    Run,
    /// Pause at the next boundary
    Stop,
    /// Terminate at the next boundary
    Kill,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Idle => write!(f, "idle"),
            Command::Step => write!(f, "step"),
            Command::Run => write!(f, "run"),
            Command::Stop => write!(f, "stop"),
            Command::Kill => write!(f, "kill"),
        }
    }
}

/// Notifications from a job, always delivered on the controller's context.
pub trait JobListener: Send + Sync + 'static {
    /// The worker reached a checkpoint. `time` is the simulation time there.
    fn step_completed(&self, _time: f64) {}

    /// The simulation asked the controller to stop it.
    fn stop_requested(&self) {}

    /// `run` returned; the worker now only redraws its last frame.
    fn finished(&self) {}

    /// The simulation failed. Reported once, after cleanup.
    fn failed(&self, _message: &str) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl JobListener for NoopListener {}

/// State shared between a [`Job`] handle and its worker thread.
pub(crate) struct JobShared {
    pub(crate) id: Uuid,
    pub(crate) monitor: Arc<RendezvousMonitor>,
    pub(crate) yield_quantum: Duration,
    pub(crate) animate_interval: Duration,
    driver: Arc<dyn Driver>,
    listener: Arc<dyn JobListener>,
    simulation: Mutex<Option<Box<dyn Simulation>>>,
    worker: Mutex<Option<WorkerHandle>>,
    command: Mutex<Command>,
    throttle: AtomicBool,
    time_bits: AtomicU64,
}

impl JobShared {
    pub(crate) fn command(&self) -> Command {
        *lock(&self.command)
    }

    pub(crate) fn set_command(&self, command: Command) {
        *lock(&self.command) = command;
    }

    /// Turn a pending `Step` or `Stop` into `Stop`. Returns whether the
    /// worker should pause.
    pub(crate) fn enter_pause(&self) -> bool {
        let mut command = lock(&self.command);
        match *command {
            Command::Step | Command::Stop => {
                *command = Command::Stop;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn throttle(&self) -> bool {
        self.throttle.load(Ordering::Relaxed)
    }

    pub(crate) fn publish_time(&self, time: f64) {
        self.time_bits.store(time.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn take_simulation(&self) -> Option<Box<dyn Simulation>> {
        lock(&self.simulation).take()
    }

    /// Return the simulation and mark the job idle. Called by the worker on
    /// its way out, before it leaves the rendezvous.
    pub(crate) fn finish_worker(&self, simulation: Box<dyn Simulation>) {
        *lock(&self.simulation) = Some(simulation);
        self.clear_worker();
    }

    /// Reset the command and release the handle under the worker lock, so a
    /// concurrent `start()` either sees the old worker or a fully idle job.
    pub(crate) fn clear_worker(&self) {
        let mut worker = lock(&self.worker);
        self.set_command(Command::Idle);
        *worker = None;
    }

    pub(crate) fn post_step_completed(&self, time: f64) {
        let listener = Arc::clone(&self.listener);
        self.driver
            .post(Box::new(move || listener.step_completed(time)));
    }

    pub(crate) fn post_stop_requested(&self) {
        let listener = Arc::clone(&self.listener);
        self.driver.post(Box::new(move || listener.stop_requested()));
    }

    pub(crate) fn post_finished(&self) {
        let listener = Arc::clone(&self.listener);
        self.driver.post(Box::new(move || listener.finished()));
    }

    pub(crate) fn post_failed(&self, message: String) {
        let listener = Arc::clone(&self.listener);
        self.driver.post(Box::new(move || listener.failed(&message)));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Controller-side handle to a simulation and the worker running it.
///
/// The worker is created on the first `start()` or `step()` and lives until
/// the simulation is killed or fails; after that the next `start()` or
/// `step()` runs the same simulation again from a fresh worker.
///
/// Commands only take effect when the worker reaches its next boundary.
#[derive(Clone)]
pub struct Job {
    pub(crate) shared: Arc<JobShared>,
}

impl Job {
    pub fn new(
        simulation: Box<dyn Simulation>,
        driver: Arc<dyn Driver>,
        listener: Arc<dyn JobListener>,
        config: &JobConfig,
    ) -> Self {
        let shared = JobShared {
            id: Uuid::new_v4(),
            monitor: RendezvousMonitor::new(Arc::clone(&driver)),
            yield_quantum: config.yield_quantum(),
            animate_interval: config.animate_interval(),
            driver,
            listener,
            simulation: Mutex::new(Some(simulation)),
            worker: Mutex::new(None),
            command: Mutex::new(Command::Idle),
            throttle: AtomicBool::new(config.throttle),
            time_bits: AtomicU64::new(f64::NAN.to_bits()),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Run until stopped.
    pub fn start(&self) -> Result<()> {
        self.issue(Command::Run)
    }

    /// Run up to the next checkpoint, then pause.
    pub fn step(&self) -> Result<()> {
        self.issue(Command::Step)
    }

    /// Pause at the next checkpoint. Wakes nothing.
    pub fn stop(&self) {
        self.shared.set_command(Command::Stop);
    }

    /// Terminate the worker at its next boundary.
    pub fn kill(&self) {
        self.shared.set_command(Command::Kill);
        if let Some(worker) = lock(&self.shared.worker).as_ref() {
            worker.cancel();
        }
        tracing::info!(job_id = %self.shared.id, "Job killed");
        self.wake();
    }

    /// Let a paused worker redraw without changing what it was told to do.
    pub fn wake(&self) {
        if self.is_active() {
            self.shared.monitor.schedule_wake();
        }
    }

    /// Refresh at every checkpoint and hold the worker to one refresh per
    /// animate interval.
    pub fn set_throttle(&self, throttle: bool) {
        self.shared.throttle.store(throttle, Ordering::Relaxed);
    }

    pub fn is_throttled(&self) -> bool {
        self.shared.throttle()
    }

    /// Whether a worker currently exists
    pub fn is_active(&self) -> bool {
        lock(&self.shared.worker).is_some()
    }

    pub fn command(&self) -> Command {
        self.shared.command()
    }

    /// Simulation time published at the most recent checkpoint
    pub fn last_time(&self) -> f64 {
        f64::from_bits(self.shared.time_bits.load(Ordering::Relaxed))
    }

    pub fn monitor(&self) -> &Arc<RendezvousMonitor> {
        &self.shared.monitor
    }

    fn issue(&self, command: Command) -> Result<()> {
        let mut worker = lock(&self.shared.worker);
        if worker.is_some() && self.shared.command() == Command::Kill {
            // The killed worker still owns the simulation until it exits.
            return Err(JobError::ShuttingDown);
        }
        self.shared.set_command(command);
        if worker.is_some() {
            drop(worker);
            self.shared.monitor.schedule_wake();
            return Ok(());
        }

        let handle = spawn_worker(&self.shared)?;
        tracing::info!(
            job_id = %self.shared.id,
            worker = handle.name(),
            command = %command,
            "Worker started"
        );
        *worker = Some(handle);
        Ok(())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.shared.id)
            .field("command", &self.command())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::channel;
    use crate::error::SimError;
    use crate::scheduler::JobContext;
    use std::thread;
    use std::time::Instant;

    struct Idle;

    impl Simulation for Idle {
        fn run(&mut self, _ctx: &JobContext) -> std::result::Result<(), SimError> {
            Ok(())
        }
        fn animate(&self) {}
        fn clear(&mut self) {}
    }

    fn idle_job() -> Job {
        let (driver, _events) = channel();
        Job::new(
            Box::new(Idle),
            Arc::new(driver),
            Arc::new(NoopListener),
            &JobConfig::default().with_throttle(true),
        )
    }

    #[test]
    fn command_display() {
        assert_eq!(Command::Idle.to_string(), "idle");
        assert_eq!(Command::Step.to_string(), "step");
        assert_eq!(Command::Run.to_string(), "run");
        assert_eq!(Command::Stop.to_string(), "stop");
        assert_eq!(Command::Kill.to_string(), "kill");
    }

    #[test]
    fn new_job_is_idle() {
        let job = idle_job();
        assert!(!job.is_active());
        assert_eq!(job.command(), Command::Idle);
        assert!(job.last_time().is_nan());
        assert!(job.is_throttled());
        assert_eq!(job.monitor().snapshot().registered, 0);
    }

    #[test]
    fn commands_without_worker_do_not_wake_anything() {
        let job = idle_job();
        job.stop();
        assert_eq!(job.command(), Command::Stop);
        job.wake();
        job.kill();
        assert_eq!(job.command(), Command::Kill);
        assert!(!job.monitor().snapshot().triggered);
    }

    #[test]
    fn enter_pause_only_from_step_or_stop() {
        let job = idle_job();
        for (from, pauses) in [
            (Command::Step, true),
            (Command::Stop, true),
            (Command::Run, false),
            (Command::Kill, false),
            (Command::Idle, false),
        ] {
            job.shared.set_command(from);
            assert_eq!(job.shared.enter_pause(), pauses, "from {from}");
            if pauses {
                assert_eq!(job.command(), Command::Stop);
            } else {
                assert_eq!(job.command(), from);
            }
        }
    }

    #[test]
    fn command_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Command::Run).unwrap(), "\"run\"");
        let parsed: Command = serde_json::from_str("\"kill\"").unwrap();
        assert_eq!(parsed, Command::Kill);
    }

    #[test]
    fn exiting_worker_holds_handle_until_command_reset() {
        let job = idle_job();
        let shared = Arc::clone(&job.shared);
        let command = lock(&shared.command);

        let exiting = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.clear_worker())
        };

        // Blocked on the command lock, the exiting worker still owns the handle
        let deadline = Instant::now() + Duration::from_secs(1);
        while shared.worker.try_lock().is_ok() && Instant::now() < deadline {
            thread::yield_now();
        }
        assert!(shared.worker.try_lock().is_err());

        drop(command);
        exiting.join().unwrap();
        assert_eq!(job.command(), Command::Idle);
        assert!(!job.is_active());
    }

    #[test]
    fn throttle_toggles() {
        let job = idle_job();
        job.set_throttle(false);
        assert!(!job.is_throttled());
    }
}
