//! Runtime glue that wires configs, the cursor, error capture, telemetry, and
//! runner orchestration.

pub mod config;
pub mod cursor;
pub mod error;
pub mod fatal;
pub mod runner;
pub mod telemetry;
