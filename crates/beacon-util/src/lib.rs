//! Shared utilities for beacon.
//!
//! Currently this is the logging setup shared by the daemon and by tests
//! that want readable engine traces.

pub mod log;

pub use log::{LogConfig, LogLevel};
