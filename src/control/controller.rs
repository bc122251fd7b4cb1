use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use crate::capture::{Capture, FrameSink};
use crate::config::{CaptureConfig, JobConfig};
use crate::control::panel::{CaptureStatus, Panel, ParamEntry, PanelStatus};
use crate::control::Action;
use crate::driver::{channel, Driver, EventLoop};
use crate::error::{JobError, Result};
use crate::params::{Flags, Parameters};
use crate::scheduler::{Job, JobListener};
use crate::simulation::{Controls, Simulation};

/// Upper bound on how long dropping a controller waits for its worker.
const DROP_GRACE: Duration = Duration::from_secs(1);

/// Drives one simulation from the controller's side.
///
/// Button presses take effect immediately on the panel; the job reacts the
/// next time the event loop is pumped and the worker reaches a boundary.
pub struct Controller {
    shared: Arc<ControlShared>,
    events: EventLoop,
}

struct ControlShared {
    job: Job,
    controls: Controls,
    panel: Mutex<Panel>,
}

impl Controller {
    /// Load `simulation` and wrap it in an idle job.
    pub fn new(mut simulation: Box<dyn Simulation>, config: &JobConfig) -> Self {
        let controls = Controls::new();
        simulation.load(&controls);

        let (driver, events) = channel();
        let driver: Arc<dyn Driver> = Arc::new(driver);
        let shared = Arc::new_cyclic(|weak: &Weak<ControlShared>| {
            let listener = Arc::new(PanelListener {
                shared: weak.clone(),
            });
            ControlShared {
                job: Job::new(simulation, driver, listener, config),
                controls,
                panel: Mutex::new(Panel::default()),
            }
        });

        tracing::info!(
            job_id = %shared.job.id(),
            params = shared.controls.params.keys().len(),
            flags = shared.controls.flags.declared().len(),
            "Controller ready"
        );
        Self { shared, events }
    }

    pub fn job(&self) -> &Job {
        &self.shared.job
    }

    pub fn params(&self) -> &Arc<Parameters> {
        &self.shared.controls.params
    }

    pub fn flags(&self) -> &Arc<Flags> {
        &self.shared.controls.flags
    }

    /// Press a button. Fails if the button is disabled or currently shows a
    /// different label.
    pub fn press(&self, action: Action) -> Result<()> {
        self.shared.press(&action)
    }

    /// Edit a parameter and let the simulation redraw with it.
    pub fn set_param(&self, key: &str, value: &str) -> Result<()> {
        self.shared.controls.params.edit(key, value)?;
        self.shared.job.wake();
        Ok(())
    }

    pub fn set_throttle(&self, throttle: bool) {
        self.shared.job.set_throttle(throttle);
    }

    /// Start capturing frames on every completed step. Captures are dropped
    /// on Reset.
    pub fn add_capture(&self, config: CaptureConfig, sink: Arc<dyn FrameSink>) {
        tracing::info!(label = %config.label, "Capture added");
        self.shared
            .lock_panel()
            .captures
            .push(Capture::new(config, sink));
    }

    pub fn remove_all_captures(&self) {
        self.shared.lock_panel().captures.clear();
    }

    pub fn status(&self) -> PanelStatus {
        self.shared.status()
    }

    /// Run whatever the job has posted so far.
    pub fn drain(&mut self) -> usize {
        self.events.drain()
    }

    /// Pump the event loop for `duration`. Returns the number of tasks run.
    pub async fn pump_for(&mut self, duration: Duration) -> usize {
        self.events.pump_for(duration).await
    }

    /// Pump the event loop until `done` holds for the panel status or
    /// `timeout` expires. Returns whether `done` held.
    pub async fn pump_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&PanelStatus) -> bool,
    {
        let shared = &self.shared;
        self.events
            .pump_until(timeout, || done(&shared.status()))
            .await
    }

    /// Pump until the job has no worker, e.g. after a Reset.
    pub async fn wait_inactive(&mut self, timeout: Duration) -> bool {
        let job = self.shared.job.clone();
        self.events
            .pump_until(timeout, || !job.is_active())
            .await
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let job = &self.shared.job;
        if !job.is_active() {
            return;
        }
        tracing::info!(job_id = %job.id(), "Controller dropped, killing job");
        job.kill();
        let deadline = Instant::now() + DROP_GRACE;
        while job.is_active() && Instant::now() < deadline {
            if self.events.drain() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        if job.is_active() {
            tracing::warn!(job_id = %job.id(), "Worker still running after controller drop");
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("job", &self.shared.job)
            .field("pending", &self.events.pending())
            .finish()
    }
}

impl ControlShared {
    fn lock_panel(&self) -> MutexGuard<'_, Panel> {
        self.panel.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn press(&self, action: &Action) -> Result<()> {
        let mut panel = self.lock_panel();
        if !panel.is_enabled(action) {
            return Err(JobError::ButtonDisabled(action.clone()));
        }
        tracing::info!(job_id = %self.job.id(), action = %action, "Button pressed");

        let params = &self.controls.params;
        match action {
            Action::Start => {
                self.job.start()?;
                params.set_locked(true);
                panel.start_stop = Action::Stop;
                panel.reset = Action::Reset;
                panel.step_enabled = false;
            }
            Action::Stop => {
                self.job.stop();
                panel.start_stop = Action::Start;
                panel.step_enabled = true;
            }
            Action::Step => {
                self.job.step()?;
                params.set_locked(true);
                panel.reset = Action::Reset;
            }
            Action::Reset => {
                self.job.kill();
                params.set_locked(false);
                *panel = Panel::default();
            }
            Action::Defaults => params.reset_values(),
            Action::Flag(name) => {
                if !self.controls.flags.raise(name) {
                    return Err(JobError::UnknownFlag(name.clone()));
                }
                self.job.wake();
            }
        }
        Ok(())
    }

    /// Press Stop if the job is running.
    fn click_stop(&self) {
        if self.lock_panel().is_enabled(&Action::Stop) {
            if let Err(e) = self.press(&Action::Stop) {
                tracing::debug!(error = %e, "Stop click ignored");
            }
        }
    }

    fn on_step(&self, time: f64) {
        let mut panel = self.lock_panel();
        panel.steps += 1;
        panel.last_time = time;
        for capture in &mut panel.captures {
            capture.on_step(time);
        }
    }

    fn on_finished(&self) {
        self.click_stop();
        let mut panel = self.lock_panel();
        if !panel.finished {
            tracing::info!(
                job_id = %self.job.id(),
                steps = panel.steps,
                "Simulation finished"
            );
        }
        panel.finished = true;
        panel.start_enabled = false;
        panel.step_enabled = false;
    }

    fn on_failed(&self, message: &str) {
        tracing::warn!(job_id = %self.job.id(), error = %message, "Simulation failed");
        self.lock_panel().failure = Some(message.to_string());
    }

    fn status(&self) -> PanelStatus {
        let panel = self.lock_panel();
        let params = &self.controls.params;
        PanelStatus {
            job_id: self.job.id(),
            command: self.job.command(),
            active: self.job.is_active(),
            throttled: self.job.is_throttled(),
            buttons: panel.buttons(),
            params_locked: params.is_locked(),
            params: params
                .values()
                .into_iter()
                .map(|(key, value)| ParamEntry { key, value })
                .collect(),
            flags: self.controls.flags.declared(),
            steps: panel.steps,
            time: Some(panel.last_time).filter(|t| !t.is_nan()),
            finished: panel.finished,
            failure: panel.failure.clone(),
            captures: panel
                .captures
                .iter()
                .map(|c| CaptureStatus {
                    label: c.config().label.clone(),
                    saved: c.saved(),
                })
                .collect(),
        }
    }
}

/// Routes job notifications back to the panel. Holds the panel weakly; the
/// job it listens to is owned by the panel.
struct PanelListener {
    shared: Weak<ControlShared>,
}

impl JobListener for PanelListener {
    fn step_completed(&self, time: f64) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_step(time);
        }
    }

    fn stop_requested(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.click_stop();
        }
    }

    fn finished(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_finished();
        }
    }

    fn failed(&self, message: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_failed(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MemorySink;
    use crate::error::SimError;
    use crate::scheduler::{Command, JobContext};

    /// Never reaches a worker in these tests; only the panel logic runs.
    struct Loaded;

    impl Simulation for Loaded {
        fn load(&mut self, controls: &Controls) {
            controls.params.add("rate", 3.7);
            controls.params.add_unlocked("label", "demo");
            controls.flags.declare("Shake");
        }
        fn run(&mut self, _ctx: &JobContext) -> std::result::Result<(), SimError> {
            Ok(())
        }
        fn animate(&self) {}
        fn clear(&mut self) {}
    }

    fn controller() -> Controller {
        Controller::new(Box::new(Loaded), &JobConfig::default())
    }

    #[test]
    fn load_declares_params_and_flags() {
        let ctl = controller();
        let status = ctl.status();
        assert_eq!(status.params.len(), 2);
        assert_eq!(status.param("rate"), Some(&3.7.into()));
        assert_eq!(status.flags, vec!["Shake".to_string()]);
        assert!(!status.params_locked);
        assert!(!status.active);
        assert_eq!(status.time, None);
    }

    #[test]
    fn disabled_buttons_are_refused() {
        let ctl = controller();
        assert!(matches!(
            ctl.press(Action::Stop),
            Err(JobError::ButtonDisabled(Action::Stop))
        ));
        assert!(matches!(
            ctl.press(Action::Reset),
            Err(JobError::ButtonDisabled(Action::Reset))
        ));
    }

    #[test]
    fn defaults_restores_values() {
        let ctl = controller();
        ctl.set_param("rate", "2.5").unwrap();
        assert_eq!(ctl.params().fget("rate").unwrap(), 2.5);
        ctl.press(Action::Defaults).unwrap();
        assert_eq!(ctl.params().fget("rate").unwrap(), 3.7);
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let ctl = controller();
        assert!(matches!(
            ctl.press(Action::Flag("Melt".to_string())),
            Err(JobError::UnknownFlag(_))
        ));
        ctl.press(Action::Flag("Shake".to_string())).unwrap();
        assert!(ctl.flags().is_raised("Shake"));
    }

    #[test]
    fn steps_and_captures_follow_notifications() {
        let ctl = controller();
        let sink = MemorySink::new();
        ctl.add_capture(
            CaptureConfig::new("main").with_window(1.0, 10.0),
            Arc::new(sink.clone()),
        );

        for t in [0.0, 1.0, 2.0] {
            ctl.shared.on_step(t);
        }
        let status = ctl.status();
        assert_eq!(status.steps, 3);
        assert_eq!(status.time, Some(2.0));
        assert_eq!(status.captures[0].saved, 2);
        assert_eq!(sink.len(), 2);

        ctl.remove_all_captures();
        assert!(ctl.status().captures.is_empty());
    }

    #[test]
    fn finished_disables_run_buttons() {
        let ctl = controller();
        ctl.shared.on_finished();
        let status = ctl.status();
        assert!(status.finished);
        assert!(matches!(
            ctl.press(Action::Start),
            Err(JobError::ButtonDisabled(Action::Start))
        ));
        assert!(matches!(
            ctl.press(Action::Step),
            Err(JobError::ButtonDisabled(Action::Step))
        ));
    }

    #[test]
    fn failure_is_recorded() {
        let ctl = controller();
        ctl.shared.on_failed("diverged");
        assert_eq!(ctl.status().failure.as_deref(), Some("diverged"));
        assert_eq!(ctl.job().command(), Command::Idle);
    }

    #[test]
    fn status_serializes() {
        let ctl = controller();
        let json = serde_json::to_value(ctl.status()).unwrap();
        assert_eq!(json["command"], "idle");
        assert_eq!(json["buttons"][0]["label"], "Start");
        assert_eq!(json["params"][0]["key"], "rate");
        assert_eq!(json["params"][0]["value"], 3.7);
        assert!(json["time"].is_null());
    }
}
