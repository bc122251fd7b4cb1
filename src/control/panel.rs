use serde::Serialize;
use uuid::Uuid;

use crate::capture::Capture;
use crate::control::Action;
use crate::params::ParamValue;
use crate::scheduler::Command;

/// Button and progress state behind a [`Controller`](super::Controller).
#[derive(Debug)]
pub(crate) struct Panel {
    /// Label of the start/stop button, either `Start` or `Stop`
    pub(crate) start_stop: Action,
    /// Label of the reset button, either `Defaults` or `Reset`
    pub(crate) reset: Action,
    pub(crate) start_enabled: bool,
    pub(crate) step_enabled: bool,
    pub(crate) steps: u64,
    pub(crate) last_time: f64,
    pub(crate) finished: bool,
    pub(crate) failure: Option<String>,
    pub(crate) captures: Vec<Capture>,
}

impl Default for Panel {
    fn default() -> Self {
        Self {
            start_stop: Action::Start,
            reset: Action::Defaults,
            start_enabled: true,
            step_enabled: true,
            steps: 0,
            last_time: f64::NAN,
            finished: false,
            failure: None,
            captures: Vec::new(),
        }
    }
}

impl Panel {
    /// Whether pressing `action` would do anything. A button only answers to
    /// the label it currently shows.
    pub(crate) fn is_enabled(&self, action: &Action) -> bool {
        match action {
            Action::Start | Action::Stop => self.start_enabled && self.start_stop == *action,
            Action::Step => self.step_enabled,
            Action::Reset | Action::Defaults => self.reset == *action,
            Action::Flag(_) => true,
        }
    }

    pub(crate) fn buttons(&self) -> Vec<ButtonStatus> {
        vec![
            ButtonStatus {
                label: self.start_stop.to_string(),
                enabled: self.start_enabled,
            },
            ButtonStatus {
                label: Action::Step.to_string(),
                enabled: self.step_enabled,
            },
            ButtonStatus {
                label: self.reset.to_string(),
                enabled: true,
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonStatus {
    pub label: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamEntry {
    pub key: String,
    pub value: ParamValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureStatus {
    pub label: String,
    pub saved: u64,
}

/// Snapshot of a controller, as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct PanelStatus {
    pub job_id: Uuid,
    pub command: Command,
    pub active: bool,
    pub throttled: bool,
    pub buttons: Vec<ButtonStatus>,
    pub params_locked: bool,
    pub params: Vec<ParamEntry>,
    pub flags: Vec<String>,
    /// Checkpoints reached since the last reset
    pub steps: u64,
    /// Simulation time at the last checkpoint, if the simulation has one
    pub time: Option<f64>,
    pub finished: bool,
    pub failure: Option<String>,
    pub captures: Vec<CaptureStatus>,
}

impl PanelStatus {
    /// Whether the start/stop button currently reads "Stop".
    pub fn is_running(&self) -> bool {
        self.button(&Action::Stop).is_some()
    }

    pub fn button(&self, label: &Action) -> Option<&ButtonStatus> {
        let label = label.to_string();
        self.buttons.iter().find(|b| b.label == label)
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.key == key).map(|p| &p.value)
    }
}
