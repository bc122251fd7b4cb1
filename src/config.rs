use std::time::Duration;

/// Timing configuration for a job's boundary protocol.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Minimum time between two yields to the controller
    pub yield_quantum_ms: u64,
    /// Target interval between two output refreshes while running
    pub animate_interval_ms: u64,
    /// Refresh output at every boundary and sleep out the rest of the interval
    pub throttle: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            yield_quantum_ms: 10,
            animate_interval_ms: 50,
            throttle: false,
        }
    }
}

impl JobConfig {
    pub fn with_yield_quantum_ms(mut self, ms: u64) -> Self {
        self.yield_quantum_ms = ms;
        self
    }

    pub fn with_animate_interval_ms(mut self, ms: u64) -> Self {
        self.animate_interval_ms = ms;
        self
    }

    pub fn with_throttle(mut self, throttle: bool) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn yield_quantum(&self) -> Duration {
        Duration::from_millis(self.yield_quantum_ms)
    }

    pub fn animate_interval(&self) -> Duration {
        Duration::from_millis(self.animate_interval_ms)
    }
}

/// Configuration for capturing frames while a simulation advances.
///
/// Times are in simulation units as reported by `Simulation::time`.
/// A simulation without a notion of time (`NaN`) is captured at every step.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Name of the output being captured
    pub label: String,
    /// First simulation time eligible for capture (inclusive)
    pub start_time: f64,
    /// End of the capture window (exclusive)
    pub end_time: f64,
    /// Minimum simulation time between two captured frames
    pub delay: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            label: "main".to_string(),
            start_time: 0.0,
            end_time: f64::INFINITY,
            delay: 0.0,
        }
    }
}

impl CaptureConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_window(mut self, start_time: f64, end_time: f64) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_config_default() {
        let cfg = JobConfig::default();
        assert_eq!(cfg.yield_quantum_ms, 10);
        assert_eq!(cfg.animate_interval_ms, 50);
        assert!(!cfg.throttle);
        assert_eq!(cfg.yield_quantum(), Duration::from_millis(10));
        assert_eq!(cfg.animate_interval(), Duration::from_millis(50));
    }

    #[test]
    fn job_config_builders() {
        let cfg = JobConfig::default()
            .with_yield_quantum_ms(2)
            .with_animate_interval_ms(20)
            .with_throttle(true);
        assert_eq!(cfg.yield_quantum(), Duration::from_millis(2));
        assert_eq!(cfg.animate_interval(), Duration::from_millis(20));
        assert!(cfg.throttle);
    }

    #[test]
    fn capture_config_default_window_is_unbounded() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.label, "main");
        assert_eq!(cfg.start_time, 0.0);
        assert!(cfg.end_time.is_infinite());
        assert_eq!(cfg.delay, 0.0);
    }

    #[test]
    fn capture_config_builders() {
        let cfg = CaptureConfig::new("lattice")
            .with_window(1.0, 5.0)
            .with_delay(0.5);
        assert_eq!(cfg.label, "lattice");
        assert_eq!(cfg.start_time, 1.0);
        assert_eq!(cfg.end_time, 5.0);
        assert_eq!(cfg.delay, 0.5);
    }
}
