//! Gantry Core
//!
//! Core domain types, traits, and error handling for Gantry.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the scheduler, the execution backends and the reporters.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod pipeline;
pub mod ports;
pub mod run;

pub use config::RunConfig;
pub use error::{ConfigError, Error, Result};
pub use ids::*;
