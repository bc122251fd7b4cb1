pub mod context;
pub mod job;

pub use context::JobContext;
pub use job::{Command, Job, JobListener, NoopListener};
