use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio_util::sync::CancellationToken;

use crate::error::SimError;
use crate::scheduler::job::{Command, JobShared};
use crate::scheduler::JobContext;
use crate::simulation::Simulation;

/// The controller's view of a running worker thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    name: String,
    cancel: CancellationToken,
}

impl WorkerHandle {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// Spawn the worker thread for a job. The thread is detached; it clears the
/// job's worker handle itself once it has cleaned up.
pub(crate) fn spawn_worker(job: &Arc<JobShared>) -> io::Result<WorkerHandle> {
    let cancel = CancellationToken::new();
    let shared = Arc::clone(job);
    let token = cancel.clone();

    let id = job.id.simple().to_string();
    let name = format!("job-{}", &id[..8]);
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || run_worker(shared, token))?;

    Ok(WorkerHandle { name, cancel })
}

/// Top level of a worker thread.
///
/// Cleanup runs however the simulation ended: normal return followed by a
/// kill, a kill mid-run, an error, or a panic.
fn run_worker(job: Arc<JobShared>, cancel: CancellationToken) {
    let Some(mut simulation) = job.take_simulation() else {
        tracing::error!(job_id = %job.id, "Worker started without a simulation");
        job.clear_worker();
        return;
    };

    let ctx = JobContext::new(Arc::clone(&job), cancel);
    job.monitor.register();
    tracing::debug!(job_id = %job.id, "Worker holds the turn");

    let outcome =
        panic::catch_unwind(AssertUnwindSafe(|| drive(&job, &ctx, simulation.as_mut())));
    let failure = match outcome {
        Ok(Ok(())) | Ok(Err(SimError::Killed)) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(format!(
            "Simulation panicked: {}",
            panic_payload_to_string(&payload)
        )),
    };

    match &failure {
        Some(message) => {
            tracing::error!(job_id = %job.id, error = %message, "Simulation failed")
        }
        None => tracing::info!(job_id = %job.id, "Worker finished"),
    }

    if panic::catch_unwind(AssertUnwindSafe(|| simulation.clear())).is_err() {
        tracing::error!(job_id = %job.id, "Simulation panicked in clear()");
    }
    job.finish_worker(simulation);
    if let Some(message) = failure {
        job.post_failed(message);
    }
    job.monitor.unregister();
}

fn drive(
    job: &JobShared,
    ctx: &JobContext,
    simulation: &mut dyn Simulation,
) -> Result<(), SimError> {
    simulation.run(ctx)?;
    if ctx.is_killed() {
        return Err(SimError::Killed);
    }
    tracing::info!(job_id = %job.id, "Simulation returned, holding last frame");
    hold_last_frame(job, ctx, simulation)
}

/// Keep a finished simulation inspectable: redraw whenever the controller
/// hands over the turn, until the job is killed.
fn hold_last_frame(
    job: &JobShared,
    ctx: &JobContext,
    simulation: &dyn Simulation,
) -> Result<(), SimError> {
    loop {
        job.post_finished();
        simulation.animate();
        job.monitor.pass();
        if job.command() == Command::Kill || ctx.is_killed() {
            return Err(SimError::Killed);
        }
    }
}

fn panic_payload_to_string(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_render_as_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_string(&payload), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_payload_to_string(&payload), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_payload_to_string(&payload), "unknown panic");
    }
}
