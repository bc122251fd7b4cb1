use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Killed;
use crate::scheduler::job::{Command, JobShared};
use crate::simulation::Simulation;

/// The worker's handle to its job, passed to [`Simulation::run`].
///
/// Every boundary the simulation offers goes through here. Boundaries may
/// only be called from the worker thread that owns the context; calling one
/// from anywhere else is a bug in the simulation and panics.
pub struct JobContext {
    shared: Arc<JobShared>,
    thread: ThreadId,
    cancel: CancellationToken,
    last_yield: Cell<Option<Instant>>,
    last_animate: Cell<Option<Instant>>,
}

impl JobContext {
    pub(crate) fn new(shared: Arc<JobShared>, cancel: CancellationToken) -> Self {
        Self {
            shared,
            thread: thread::current().id(),
            cancel,
            last_yield: Cell::new(None),
            last_animate: Cell::new(None),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.shared.id
    }

    /// Whether the job has been killed. Once true, every boundary returns
    /// [`Killed`].
    pub fn is_killed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Announce a completed unit of work and act on the controller's command.
    ///
    /// While running this refreshes output at the animate cadence and lets
    /// the controller catch up; after a step or a stop it pauses until the
    /// controller issues another command, redrawing on every wake. Returns
    /// `Err(Killed)` when the job has been killed.
    pub fn checkpoint<S: Simulation + ?Sized>(&self, sim: &S) -> Result<(), Killed> {
        self.assert_worker("checkpoint");
        let job = &*self.shared;

        let time = sim.time();
        job.publish_time(time);
        job.post_step_completed(time);

        if job.command() == Command::Run {
            let remaining = self.until_next_animate(Instant::now());
            if job.throttle() {
                // The unit just finished counts towards the interval.
                job.monitor.sleep(remaining);
                sim.animate();
                self.last_animate.set(Some(Instant::now()));
            } else {
                if remaining.is_zero() {
                    sim.animate();
                    self.last_animate.set(Some(Instant::now()));
                }
                self.yield_turn();
            }
        }

        // The command may have changed while the worker slept or yielded.
        if job.enter_pause() {
            loop {
                sim.animate();
                job.monitor.pass();
                if job.command() != Command::Stop {
                    break;
                }
            }
        }

        if job.command() == Command::Kill || self.is_killed() {
            tracing::debug!(job_id = %job.id, "Kill observed at checkpoint");
            return Err(Killed);
        }
        Ok(())
    }

    /// Let the controller process its pending events if the yield quantum
    /// has elapsed. Never pauses; returns `Err(Killed)` once the job has been
    /// killed so tight inner loops can bail out early.
    pub fn yield_point(&self) -> Result<(), Killed> {
        self.assert_worker("yield_point");
        self.yield_turn();
        self.check_killed()
    }

    /// Ask the controller to stop this job, e.g. because the simulation hit a
    /// terminal condition. The pause itself happens at the next checkpoint.
    pub fn request_stop(&self) -> Result<(), Killed> {
        self.assert_worker("request_stop");
        self.shared.post_stop_requested();
        self.yield_turn();
        self.check_killed()
    }

    fn yield_turn(&self) {
        let due = self
            .last_yield
            .get()
            .map_or(true, |at| at.elapsed() > self.shared.yield_quantum);
        if due {
            self.shared.monitor.sleep(Duration::ZERO);
            self.last_yield.set(Some(Instant::now()));
        }
    }

    /// Time left before the next refresh is due, measured from the previous
    /// one. Zero when nothing has been drawn yet.
    fn until_next_animate(&self, now: Instant) -> Duration {
        self.last_animate
            .get()
            .map_or(Duration::ZERO, |at| {
                (at + self.shared.animate_interval).saturating_duration_since(now)
            })
    }

    fn check_killed(&self) -> Result<(), Killed> {
        if self.is_killed() {
            Err(Killed)
        } else {
            Ok(())
        }
    }

    fn assert_worker(&self, boundary: &str) {
        if thread::current().id() != self.thread {
            panic!(
                "{}() must be called from the worker thread of job {}",
                boundary, self.shared.id
            );
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.shared.id)
            .field("killed", &self.is_killed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::driver::channel;
    use crate::error::SimError;
    use crate::scheduler::{Job, NoopListener};

    struct Idle;

    impl Simulation for Idle {
        fn run(&mut self, _ctx: &JobContext) -> Result<(), SimError> {
            Ok(())
        }
        fn animate(&self) {}
        fn clear(&mut self) {}
    }

    fn detached_context() -> (Job, JobContext) {
        let (driver, _events) = channel();
        let job = Job::new(
            Box::new(Idle),
            Arc::new(driver),
            Arc::new(NoopListener),
            &JobConfig::default(),
        );
        let ctx = JobContext::new(job.shared.clone(), CancellationToken::new());
        (job, ctx)
    }

    #[test]
    fn boundary_from_foreign_thread_panics() {
        let (_job, ctx) = detached_context();
        let result = thread::spawn(move || ctx.yield_point()).join();
        assert!(result.is_err());
    }

    #[test]
    fn cancelled_context_reports_killed() {
        let (_job, ctx) = detached_context();
        assert!(!ctx.is_killed());
        assert_eq!(ctx.check_killed(), Ok(()));
        ctx.cancel.cancel();
        assert!(ctx.is_killed());
        assert_eq!(ctx.check_killed(), Err(Killed));
    }

    #[test]
    fn next_animate_is_measured_from_previous_one() {
        let (_job, ctx) = detached_context();
        let now = Instant::now();
        assert_eq!(ctx.until_next_animate(now), Duration::ZERO);

        ctx.last_animate.set(Some(now));
        assert_eq!(
            ctx.until_next_animate(now + Duration::from_millis(30)),
            Duration::from_millis(20)
        );
        assert_eq!(
            ctx.until_next_animate(now + Duration::from_millis(51)),
            Duration::ZERO
        );
    }
}
