//! Execution backends for Gantry.

pub mod config;
pub mod shell;

pub use config::RunnerConfig;
pub use shell::ShellBackend;
