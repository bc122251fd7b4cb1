//! Headless control panel for a single simulation.
//!
//! A [`Controller`] owns a [`Job`](crate::scheduler::Job) and the event loop
//! its notifications arrive on. It models the usual Start/Stop, Step and
//! Reset/Defaults buttons plus one button per user flag:
//!
//! - Start runs the job and locks parameters; the button turns into Stop
//! - Stop pauses the job at its next checkpoint
//! - Step runs a single unit
//! - Reset kills the job, unlocks parameters and drops frame captures
//! - Defaults restores parameter values (only while nothing has run)
//!
//! Nothing here runs unless the controller's event loop is pumped, see
//! [`Controller::pump_for`] and [`Controller::pump_until`].

mod controller;
mod panel;

pub use controller::Controller;
pub use panel::{ButtonStatus, CaptureStatus, ParamEntry, PanelStatus};

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// A button on the control panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Action {
    Start,
    Stop,
    Step,
    Reset,
    Defaults,
    /// Raise the named user flag
    Flag(String),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => write!(f, "Start"),
            Action::Stop => write!(f, "Stop"),
            Action::Step => write!(f, "Step"),
            Action::Reset => write!(f, "Reset"),
            Action::Defaults => write!(f, "Defaults"),
            Action::Flag(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    /// Parses `start`, `stop`, `step`, `reset`, `defaults` (any case) and
    /// `flag:<name>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("flag:") {
            if name.is_empty() {
                return Err("flag name must not be empty".to_string());
            }
            return Ok(Action::Flag(name.to_string()));
        }
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "step" => Ok(Action::Step),
            "reset" => Ok(Action::Reset),
            "defaults" => Ok(Action::Defaults),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}
