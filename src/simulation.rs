//! The contract between a long-running computation and the scheduler.

use std::sync::Arc;

use crate::error::SimError;
use crate::params::{Flags, Parameters};
use crate::scheduler::JobContext;

/// Handles a simulation receives when it is loaded into a controller.
#[derive(Debug, Clone, Default)]
pub struct Controls {
    pub params: Arc<Parameters>,
    pub flags: Arc<Flags>,
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A long-running computation driven by a [`Job`](crate::scheduler::Job).
///
/// `run` executes on the job's worker thread and must reach a boundary
/// (`ctx.checkpoint(self)` or `ctx.yield_point()`) regularly; between two
/// boundaries it has the simulation state to itself. Once a boundary
/// returns [`Killed`](crate::error::Killed) the simulation must return
/// promptly, normally by propagating it with `?`.
///
/// ```ignore
/// fn run(&mut self, ctx: &JobContext) -> Result<(), SimError> {
///     loop {
///         self.advance();
///         ctx.checkpoint(self)?;
///     }
/// }
/// ```
pub trait Simulation: Send + 'static {
    /// Declare parameters and flags. Called once, before the first run.
    fn load(&mut self, _controls: &Controls) {}

    /// Main entry point. May loop forever or return.
    fn run(&mut self, ctx: &JobContext) -> Result<(), SimError>;

    /// Refresh observable output. Takes `&self`: it must not advance the
    /// simulation, only publish its current state.
    fn animate(&self);

    /// Release per-run state. Called exactly once after every run, however
    /// it ended.
    fn clear(&mut self);

    /// Simulation time, or `NaN` when the computation has none.
    fn time(&self) -> f64 {
        f64::NAN
    }
}
