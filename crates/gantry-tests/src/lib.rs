//! Integration test infrastructure for Gantry.
//!
//! Scripted execution backends, recording reporters and pipeline fixtures
//! for exercising the scheduler end to end without real processes.
//!
//! # Usage
//!
//! ```ignore
//! use gantry_tests::{PipelineFixture, ScriptedBackend, RecordingReporter};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let backend = ScriptedBackend::new().with_default_artifact("coverage.xml");
//!     let reporter = RecordingReporter::new();
//!     // plan a run from PipelineFixture::scenario_a() and execute it
//! }
//! ```

pub mod fixtures;
pub mod helpers;
pub mod mocks;

pub use fixtures::*;
pub use helpers::*;
pub use mocks::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gantry_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
