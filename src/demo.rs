//! Small simulations bundled with the `coop-sched` binary.

use std::thread;
use std::time::Duration;

use crate::error::SimError;
use crate::scheduler::JobContext;
use crate::simulation::{Controls, Simulation};

/// Names accepted by [`by_name`], with a one-line description each.
pub const DEMOS: &[(&str, &str)] = &[
    ("logistic", "Logistic map iterated forever; asks to stop if it escapes [0, 1]"),
    ("countdown", "Counts down a fixed number of steps, then holds its last frame"),
    ("faulty", "Fails with an error or a panic after a configurable number of steps"),
];

pub fn by_name(name: &str) -> Option<Box<dyn Simulation>> {
    match name {
        "logistic" => Some(Box::new(Logistic::default())),
        "countdown" => Some(Box::new(Countdown::default())),
        "faulty" => Some(Box::new(Faulty::default())),
        _ => None,
    }
}

/// Iterates `x <- r * x * (1 - x)`, one checkpoint per iteration.
///
/// Declares the `Perturb` flag, which nudges `x` on the next iteration.
#[derive(Debug, Default)]
pub struct Logistic {
    controls: Controls,
    x: f64,
    iteration: u64,
}

impl Simulation for Logistic {
    fn load(&mut self, controls: &Controls) {
        controls.params.add("r", 3.7);
        controls.params.add("x0", 0.5);
        controls.params.add_unlocked("delay_ms", 1);
        controls.flags.declare("Perturb");
        self.controls = controls.clone();
    }

    fn run(&mut self, ctx: &JobContext) -> Result<(), SimError> {
        let params = &self.controls.params;
        let r = params.fget("r").map_err(|e| SimError::failed(e.to_string()))?;
        self.x = params.fget("x0").map_err(|e| SimError::failed(e.to_string()))?;
        self.iteration = 0;

        loop {
            if self.controls.flags.take("Perturb") {
                self.x = (self.x + 0.01).min(1.0);
            }
            self.x = r * self.x * (1.0 - self.x);
            self.iteration += 1;
            if !(0.0..=1.0).contains(&self.x) {
                tracing::warn!(x = self.x, "Logistic map escaped the unit interval");
                ctx.request_stop()?;
            }

            let delay = self.controls.params.iget("delay_ms").unwrap_or(0).max(0);
            thread::sleep(Duration::from_millis(delay as u64));
            ctx.checkpoint(self)?;
        }
    }

    fn animate(&self) {
        tracing::debug!(iteration = self.iteration, x = self.x, "logistic");
    }

    fn clear(&mut self) {
        self.iteration = 0;
        self.x = 0.0;
    }

    fn time(&self) -> f64 {
        self.iteration as f64
    }
}

/// Counts `steps` down to zero and returns.
#[derive(Debug, Default)]
pub struct Countdown {
    controls: Controls,
    remaining: i64,
    elapsed: u64,
}

impl Simulation for Countdown {
    fn load(&mut self, controls: &Controls) {
        controls.params.add("steps", 20);
        self.controls = controls.clone();
    }

    fn run(&mut self, ctx: &JobContext) -> Result<(), SimError> {
        self.remaining = self
            .controls
            .params
            .iget("steps")
            .map_err(|e| SimError::failed(e.to_string()))?;
        self.elapsed = 0;

        while self.remaining > 0 {
            // Busy inner loop standing in for real work.
            for _ in 0..1_000 {
                ctx.yield_point()?;
            }
            self.remaining -= 1;
            self.elapsed += 1;
            ctx.checkpoint(self)?;
        }
        Ok(())
    }

    fn animate(&self) {
        tracing::debug!(remaining = self.remaining, "countdown");
    }

    fn clear(&mut self) {
        self.remaining = 0;
        self.elapsed = 0;
    }

    fn time(&self) -> f64 {
        self.elapsed as f64
    }
}

/// Runs `fail_at` steps, then fails the way `mode` says (`error` or `panic`).
#[derive(Debug, Default)]
pub struct Faulty {
    controls: Controls,
    step: i64,
}

impl Simulation for Faulty {
    fn load(&mut self, controls: &Controls) {
        controls.params.add("fail_at", 5);
        controls.params.add("mode", "error");
        self.controls = controls.clone();
    }

    fn run(&mut self, ctx: &JobContext) -> Result<(), SimError> {
        let params = &self.controls.params;
        let fail_at = params.iget("fail_at").map_err(|e| SimError::failed(e.to_string()))?;
        let mode = params.sget("mode").map_err(|e| SimError::failed(e.to_string()))?;
        self.step = 0;

        loop {
            if self.step >= fail_at {
                if mode == "panic" {
                    panic!("faulty simulation panicked at step {}", self.step);
                }
                return Err(SimError::failed(format!(
                    "faulty simulation failed at step {}",
                    self.step
                )));
            }
            self.step += 1;
            ctx.checkpoint(self)?;
        }
    }

    fn animate(&self) {
        tracing::debug!(step = self.step, "faulty");
    }

    fn clear(&mut self) {
        self.step = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_demo_can_be_built() {
        for (name, _) in DEMOS {
            assert!(by_name(name).is_some(), "missing demo {name}");
        }
        assert!(by_name("lorenz").is_none());
    }

    #[test]
    fn demos_declare_their_controls() {
        let controls = Controls::new();
        let mut sim = Logistic::default();
        sim.load(&controls);
        assert_eq!(controls.params.keys(), vec!["r", "x0", "delay_ms"]);
        assert_eq!(controls.flags.declared(), vec!["Perturb".to_string()]);

        let controls = Controls::new();
        Faulty::default().load(&controls);
        assert_eq!(controls.params.sget("mode").unwrap(), "error");
    }
}
