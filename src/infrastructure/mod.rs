//! Process-level concerns: configuration loading and log setup.

pub mod config;
pub mod logging;
