use thiserror::Error;

use crate::control::Action;

/// Errors surfaced to the controller.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Parameter not found: {0}")]
    ParamNotFound(String),

    #[error("Parameter '{0}' is locked while the job is running")]
    ParamLocked(String),

    #[error("Parameter '{key}' is incompatible with {value}")]
    InvalidParam { key: String, value: String },

    #[error("Button for {0} is disabled")]
    ButtonDisabled(Action),

    #[error("Unknown flag: {0}")]
    UnknownFlag(String),

    #[error("Job is still shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Raised at a boundary once the job has been killed.
///
/// Simulations propagate it with `?` back to the worker's entry point; it is
/// never reported as a failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("job killed")]
pub struct Killed;

/// Outcome of [`Simulation::run`](crate::simulation::Simulation::run).
#[derive(Error, Debug)]
pub enum SimError {
    #[error("job killed")]
    Killed,

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<Killed> for SimError {
    fn from(_: Killed) -> Self {
        SimError::Killed
    }
}

impl SimError {
    pub fn failed(message: impl Into<String>) -> Self {
        SimError::Failed(message.into())
    }

    pub fn is_killed(&self) -> bool {
        matches!(self, SimError::Killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn propagate() -> std::result::Result<(), SimError> {
        Err(Killed)?;
        Ok(())
    }

    #[test]
    fn killed_converts_through_question_mark() {
        let err = propagate().unwrap_err();
        assert!(err.is_killed());
    }

    #[test]
    fn failed_message_is_displayed_verbatim() {
        let err = SimError::failed("diverged at t=3.5");
        assert_eq!(err.to_string(), "diverged at t=3.5");
        assert!(!err.is_killed());
    }

    #[test]
    fn boxed_errors_convert_into_other() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(io);
        let err: SimError = boxed.into();
        assert!(matches!(err, SimError::Other(_)));
        assert_eq!(err.to_string(), "disk gone");
    }

    #[test]
    fn job_error_messages() {
        assert_eq!(
            JobError::ParamNotFound("dt".to_string()).to_string(),
            "Parameter not found: dt"
        );
        assert_eq!(
            JobError::InvalidParam {
                key: "steps".to_string(),
                value: "many".to_string()
            }
            .to_string(),
            "Parameter 'steps' is incompatible with many"
        );
    }
}
