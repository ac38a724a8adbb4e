//! Fan-in barrier: gate a target on a whole upstream set reaching a terminal state.

use crate::dag::BarrierSpec;
use gantry_core::ids::InstanceId;
use gantry_core::run::InstanceStatus;
use std::collections::BTreeSet;
use tracing::debug;

/// `Waiting -> Armed -> Fired`. No other transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Waiting,
    Armed,
    Fired,
}

#[derive(Debug, Clone)]
pub struct FanInBarrier {
    target: InstanceId,
    matched: BTreeSet<InstanceId>,
    state: BarrierState,
}

impl FanInBarrier {
    pub fn new(spec: &BarrierSpec) -> Self {
        Self {
            target: spec.target.clone(),
            matched: spec.matched_upstream().clone(),
            state: BarrierState::Waiting,
        }
    }

    pub fn target(&self) -> &InstanceId {
        &self.target
    }

    pub fn matched(&self) -> &BTreeSet<InstanceId> {
        &self.matched
    }

    pub fn state(&self) -> BarrierState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == BarrierState::Armed
    }

    /// Re-evaluate the barrier against current statuses.
    ///
    /// Returns true only on the `Waiting -> Armed` transition; later calls are no-ops.
    pub fn observe<F>(&mut self, status_of: F) -> bool
    where
        F: Fn(&InstanceId) -> InstanceStatus,
    {
        if self.state != BarrierState::Waiting {
            return false;
        }
        if self.matched.iter().all(|id| status_of(id).is_terminal()) {
            debug!(barrier = %self.target, upstream = self.matched.len(), "Barrier armed");
            self.state = BarrierState::Armed;
            return true;
        }
        false
    }

    /// Fire the barrier. Succeeds at most once, and only when armed.
    pub fn fire(&mut self) -> bool {
        if self.state == BarrierState::Armed {
            self.state = BarrierState::Fired;
            return true;
        }
        false
    }
}
