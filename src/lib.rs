pub mod capture;
pub mod config;
pub mod control;
pub mod demo;
pub mod driver;
pub mod error;
pub mod params;
pub mod rendezvous;
pub mod scheduler;
pub mod shutdown;
pub mod simulation;
pub mod worker;
