//! Turn-taking between a controller and the workers it drives.
//!
//! A worker joins with [`RendezvousMonitor::register`] and from then on only
//! runs while it holds the turn. Whoever holds the turn gives it away with
//! [`RendezvousMonitor::pass`], which wakes the other side and blocks until
//! the turn comes back. The controller never blocks on its own initiative:
//! the worker side asks for it with [`RendezvousMonitor::schedule_wake`],
//! which posts a single `pass()` onto the controller's driver.

pub mod monitor;

pub use monitor::{MonitorSnapshot, RendezvousMonitor};
