//! Test helper functions and utilities.

use gantry_core::events::RunEvent;
use gantry_core::ids::InstanceId;
use gantry_core::ports::{CoverageReporter, ExecutionBackend};
use gantry_core::RunConfig;
use gantry_scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A scheduler wired to an event channel large enough never to drop.
pub fn scheduler_with_events(
    backend: Arc<dyn ExecutionBackend>,
    reporter: Arc<dyn CoverageReporter>,
    config: RunConfig,
) -> (Scheduler, mpsc::Receiver<RunEvent>) {
    let (tx, rx) = mpsc::channel(4096);
    (Scheduler::new(backend, reporter, config).with_events(tx), rx)
}

/// Everything currently buffered on the channel.
pub fn drain_events(rx: &mut mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Position of the first event matching `predicate`.
pub fn position_of<F>(events: &[RunEvent], predicate: F) -> Option<usize>
where
    F: Fn(&RunEvent) -> bool,
{
    events.iter().position(predicate)
}

pub fn is_completion_of(event: &RunEvent, instance: &str) -> bool {
    matches!(event, RunEvent::InstanceCompleted { instance: id, .. } if id.as_str() == instance)
}

pub fn ids(names: &[&str]) -> Vec<InstanceId> {
    names.iter().map(|n| InstanceId::new(*n)).collect()
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F>(timeout: std::time::Duration, interval: std::time::Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: std::time::Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("future did not complete in time")
}
