use std::io;
use std::thread;

use tokio::sync::mpsc;

use crate::driver::{Driver, Task};

/// Runs posted tasks, in order, on a dedicated coordinator thread.
///
/// Useful when the controller has no event loop of its own (a test, a batch
/// run). The thread exits once every clone of the driver has been dropped.
#[derive(Debug, Clone)]
pub struct CoordinatorDriver {
    tx: mpsc::UnboundedSender<Task>,
}

impl CoordinatorDriver {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let thread_name = name.to_string();
        thread::Builder::new().name(thread_name).spawn(move || {
            tracing::debug!("Coordinator started");
            while let Some(task) = rx.blocking_recv() {
                task();
            }
            tracing::debug!("Coordinator stopped, all drivers dropped");
        })?;
        Ok(Self { tx })
    }
}

impl Driver for CoordinatorDriver {
    fn post(&self, task: Task) {
        if self.tx.send(task).is_err() {
            tracing::warn!("Coordinator thread is gone, dropping posted task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn runs_tasks_in_post_order_on_its_own_thread() {
        let driver = CoordinatorDriver::spawn("coordinator-test").unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..3 {
            let tx = tx.clone();
            driver.post(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }

        for expected in 0..3 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some("coordinator-test"));
        }
    }
}
