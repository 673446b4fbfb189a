//! Ensure pipeline
//!
//! A reconciliation pass is an ordered list of idempotent steps. Each step
//! either lets the pass proceed, asks for a requeue, or fails. The pipeline
//! stops at the first step that does not continue.

use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use tracing::debug;

use crate::controller::error::Result;
use crate::crd::{ManagedResource, Status};

/// Delay used for an immediate requeue
pub const REQUEUE_NOW: Duration = Duration::from_secs(1);

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Proceed with the next step
    Continue,
    /// Stop and reconcile again right away
    Requeue,
    /// Stop and reconcile again after the delay
    RequeueAfter(Duration),
}

impl StepOutcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, StepOutcome::Continue)
    }

    /// Requeue delay, `None` when the pass may proceed
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self {
            StepOutcome::Continue => None,
            StepOutcome::Requeue => Some(REQUEUE_NOW),
            StepOutcome::RequeueAfter(d) => Some(*d),
        }
    }

    /// Runtime action for a pass that stopped on this outcome
    pub fn to_action(self) -> Option<Action> {
        self.requeue_delay().map(Action::requeue)
    }
}

/// An idempotent unit of reconciliation work
#[async_trait]
pub trait EnsureStep<K: ManagedResource>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn attempt(&self, resource: &mut K) -> Result<StepOutcome>;
}

/// Ordered steps run against one resource
pub struct Pipeline<'a, K: ManagedResource> {
    steps: Vec<Box<dyn EnsureStep<K> + 'a>>,
}

impl<'a, K: ManagedResource> Pipeline<'a, K> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step(mut self, step: impl EnsureStep<K> + 'a) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Box<dyn EnsureStep<K> + 'a>>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order until one requeues or fails
    pub async fn run(&self, resource: &mut K) -> Result<StepOutcome> {
        for step in &self.steps {
            let outcome = step.attempt(resource).await?;
            if !outcome.is_continue() {
                debug!(step = step.name(), ?outcome, "pipeline stopped");
                return Ok(outcome);
            }
        }
        Ok(StepOutcome::Continue)
    }
}

impl<K: ManagedResource> Default for Pipeline<'_, K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the resource `Pending` while the remaining steps run
pub struct EnsurePending;

#[async_trait]
impl<K: ManagedResource> EnsureStep<K> for EnsurePending {
    fn name(&self) -> &'static str {
        "ensure-pending"
    }

    async fn attempt(&self, resource: &mut K) -> Result<StepOutcome> {
        let status = resource.resource_status_mut();
        if status.status != Status::Pending {
            status.set(Status::Pending, "");
        }
        Ok(StepOutcome::Continue)
    }
}
