//! Unit tests for the ensure pipeline

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;

use multicloud_operator::controller::error::{Error, Result};
use multicloud_operator::controller::pipeline::{
    EnsurePending, EnsureStep, Pipeline, REQUEUE_NOW, StepOutcome,
};
use multicloud_operator::crd::{ManagedResource, ServiceProvider, Status};

use crate::common::*;

/// Step that records its name and returns a fixed result
struct Recorded {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    result: fn() -> Result<StepOutcome>,
}

#[async_trait]
impl EnsureStep<ServiceProvider> for Recorded {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt(&self, _: &mut ServiceProvider) -> Result<StepOutcome> {
        self.log.lock().unwrap().push(self.name);
        (self.result)()
    }
}

fn provider() -> ServiceProvider {
    test_service_provider("broker", "team-a", "fake", serde_json::json!({}))
}

fn step(
    name: &'static str,
    log: &Arc<Mutex<Vec<&'static str>>>,
    result: fn() -> Result<StepOutcome>,
) -> Recorded {
    Recorded {
        name,
        log: log.clone(),
        result,
    }
}

#[tokio::test]
async fn test_runs_every_step_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new()
        .step(step("first", &log, || Ok(StepOutcome::Continue)))
        .step(step("second", &log, || Ok(StepOutcome::Continue)))
        .step(step("third", &log, || Ok(StepOutcome::Continue)));

    let outcome = pipeline.run(&mut provider()).await.unwrap();
    assert_eq!(outcome, StepOutcome::Continue);
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    assert_eq!(pipeline.len(), 3);
}

#[tokio::test]
async fn test_stops_at_first_requeue() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new()
        .step(step("first", &log, || Ok(StepOutcome::Continue)))
        .step(step("second", &log, || {
            Ok(StepOutcome::RequeueAfter(Duration::from_secs(10)))
        }))
        .step(step("third", &log, || Ok(StepOutcome::Continue)));

    let outcome = pipeline.run(&mut provider()).await.unwrap();
    assert_eq!(outcome, StepOutcome::RequeueAfter(Duration::from_secs(10)));
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_stops_at_first_error() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new()
        .step(step("first", &log, || {
            Err(Error::NotReady("dependency".to_string()))
        }))
        .step(step("second", &log, || Ok(StepOutcome::Continue)));

    let err = pipeline.run(&mut provider()).await.unwrap_err();
    assert!(!err.is_critical());
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
}

#[tokio::test]
async fn test_empty_pipeline_continues() {
    let pipeline: Pipeline<'_, ServiceProvider> = Pipeline::new();
    assert!(pipeline.is_empty());
    assert!(pipeline.run(&mut provider()).await.unwrap().is_continue());
}

#[tokio::test]
async fn test_ensure_pending_step() {
    let mut resource = with_status(provider(), Status::Success);
    let outcome = EnsurePending.attempt(&mut resource).await.unwrap();
    assert!(outcome.is_continue());
    assert_eq!(resource.current_status(), Status::Pending);
}

#[test]
fn test_outcome_actions() {
    assert_eq!(StepOutcome::Continue.to_action(), None);
    assert_eq!(
        StepOutcome::Requeue.to_action(),
        Some(Action::requeue(REQUEUE_NOW))
    );
    assert_eq!(
        StepOutcome::RequeueAfter(Duration::from_secs(30)).requeue_delay(),
        Some(Duration::from_secs(30))
    );
}
