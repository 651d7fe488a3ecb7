//! Runtime glue: configuration, running/ready signals, telemetry, and the
//! lifecycle runner.

pub mod config;
pub mod runner;
pub mod status;
pub mod telemetry;
