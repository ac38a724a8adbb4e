//! Gantry scheduling: matrix expansion, dependency graphs, fan-in barriers,
//! result aggregation and the run scheduler.

pub mod aggregator;
pub mod barrier;
pub mod dag;
pub mod matrix;
pub mod run;
pub mod scheduler;
pub mod triggers;

pub use aggregator::ResultAggregator;
pub use barrier::{BarrierState, FanInBarrier};
pub use dag::{BarrierSpec, DependencyGraph, EdgeKind, GraphBuilder};
pub use matrix::{Expansion, JobInstance, MatrixExpander};
pub use run::PipelineRun;
pub use scheduler::{cancellation, CancelHandle, CancelToken, Scheduler};
pub use triggers::{TriggerEvent, TriggerMatcher};
