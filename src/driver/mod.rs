//! Execution contexts the scheduler posts work onto.
//!
//! The rendezvous monitor never blocks the controller from the worker side.
//! Instead it posts a task onto the controller's own execution context, and
//! the controller runs it when it gets to it:
//!
//! - [`QueueDriver`] + [`EventLoop`]: the controller owns an event loop and
//!   drains posted tasks between its own commands
//! - [`CoordinatorDriver`]: a dedicated thread acts as the controller
//!
//! Tasks may block (a scheduled wake hands the turn to the worker and waits
//! for it to come back), so they must only ever run on the controller's
//! context, one at a time.

pub mod coordinator;
pub mod queue;

pub use coordinator::CoordinatorDriver;
pub use queue::{channel, EventLoop, QueueDriver};

/// A unit of work run on the controller's context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run a task on the controller's execution context.
///
/// `post` must not block and must not run the task inline: the monitor posts
/// while holding its own lock.
pub trait Driver: Send + Sync + 'static {
    fn post(&self, task: Task);
}
