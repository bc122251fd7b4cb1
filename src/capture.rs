//! Frame capture while a simulation advances.
//!
//! A [`Capture`] is attached to a controller and consulted after every
//! completed step. When the step's simulation time falls inside the
//! configured window it writes a [`Frame`] to its [`FrameSink`].

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CaptureConfig;

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub label: String,
    /// Position in the capture, counting from 0
    pub index: u64,
    /// Simulation time of the step, `NaN` for timeless simulations
    pub time: f64,
    pub captured_at: DateTime<Utc>,
}

/// Destination for captured frames.
pub trait FrameSink: Send + Sync {
    fn write_frame(&self, frame: &Frame) -> io::Result<()>;
}

/// Keeps every frame in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Frame>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&self, frame: &Frame) -> io::Result<()> {
        self.lock().push(frame.clone());
        Ok(())
    }
}

/// Logs each frame instead of storing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn write_frame(&self, frame: &Frame) -> io::Result<()> {
        tracing::info!(
            label = %frame.label,
            index = frame.index,
            time = frame.time,
            captured_at = %frame.captured_at.to_rfc3339(),
            "Frame captured"
        );
        Ok(())
    }
}

/// An active capture: its window, its sink and how far it has got.
pub struct Capture {
    config: CaptureConfig,
    sink: Arc<dyn FrameSink>,
    saved: u64,
    last_save_time: f64,
}

impl Capture {
    pub fn new(config: CaptureConfig, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            config,
            sink,
            saved: 0,
            last_save_time: f64::NEG_INFINITY,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Frames captured so far
    pub fn saved(&self) -> u64 {
        self.saved
    }

    /// Whether a step at `time` should be captured.
    pub fn is_due(&self, time: f64) -> bool {
        if time.is_nan() {
            return true;
        }
        time >= self.config.start_time
            && time < self.config.end_time
            && time - self.last_save_time > self.config.delay
    }

    /// Called after every completed step. Returns whether a frame was taken.
    ///
    /// A frame the sink fails to write still counts, so the next frame keeps
    /// its index and spacing.
    pub fn on_step(&mut self, time: f64) -> bool {
        if !self.is_due(time) {
            return false;
        }

        let frame = Frame {
            label: self.config.label.clone(),
            index: self.saved,
            time,
            captured_at: Utc::now(),
        };
        if let Err(e) = self.sink.write_frame(&frame) {
            tracing::warn!(
                label = %frame.label,
                index = frame.index,
                error = %e,
                "Failed to write frame"
            );
        }
        self.last_save_time = time;
        self.saved += 1;
        true
    }
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("config", &self.config)
            .field("saved", &self.saved)
            .field("last_save_time", &self.last_save_time)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    impl FrameSink for BrokenSink {
        fn write_frame(&self, _frame: &Frame) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    fn capture(config: CaptureConfig) -> (Capture, MemorySink) {
        let sink = MemorySink::new();
        (Capture::new(config, Arc::new(sink.clone())), sink)
    }

    #[test]
    fn captures_only_inside_window() {
        let (mut cap, sink) = capture(CaptureConfig::new("main").with_window(1.0, 3.0));
        for t in [0.0, 0.5, 1.0, 2.0, 2.5, 3.0, 4.0] {
            cap.on_step(t);
        }
        let times: Vec<f64> = sink.frames().iter().map(|f| f.time).collect();
        assert_eq!(times, vec![1.0, 2.0, 2.5]);
    }

    #[test]
    fn delay_spaces_frames() {
        let (mut cap, sink) = capture(CaptureConfig::default().with_delay(1.0));
        for t in [0.0, 0.5, 1.0, 1.5, 2.0, 2.5] {
            cap.on_step(t);
        }
        let times: Vec<f64> = sink.frames().iter().map(|f| f.time).collect();
        assert_eq!(times, vec![0.0, 1.5]);
    }

    #[test]
    fn timeless_simulation_captures_every_step() {
        let (mut cap, sink) = capture(CaptureConfig::default().with_window(5.0, 6.0));
        for _ in 0..3 {
            assert!(cap.on_step(f64::NAN));
        }
        let indices: Vec<u64> = sink.frames().iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(cap.saved(), 3);
    }

    #[test]
    fn failed_writes_still_advance() {
        let mut cap = Capture::new(CaptureConfig::default(), Arc::new(BrokenSink));
        assert!(cap.on_step(0.0));
        assert!(cap.on_step(1.0));
        assert_eq!(cap.saved(), 2);
    }

    #[test]
    fn frame_serializes_with_timestamp() {
        let (mut cap, sink) = capture(CaptureConfig::new("lattice"));
        cap.on_step(0.25);
        let json = serde_json::to_value(&sink.frames()[0]).unwrap();
        assert_eq!(json["label"], "lattice");
        assert_eq!(json["index"], 0);
        assert_eq!(json["time"], 0.25);
        assert!(json["captured_at"].is_string());
    }
}
