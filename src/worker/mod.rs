//! Worker threads that run simulations.
//!
//! Each [`Job`](crate::scheduler::Job) gets at most one worker at a time:
//!
//! 1. [`executor::spawn_worker`] starts a named, detached thread
//! 2. The thread joins the job's rendezvous and waits for its first turn
//! 3. It runs the simulation, which pauses and resumes at its checkpoints
//! 4. When the simulation returns it keeps redrawing the last frame on demand
//! 5. On kill, error or panic it clears the simulation, hands it back to the
//!    job and leaves the rendezvous
//!
//! Errors and panics are reported to the controller once, after cleanup.

pub mod executor;
