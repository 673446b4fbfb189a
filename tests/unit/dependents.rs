//! Unit tests for dependent-resource ordering

use std::time::Duration;

use kube::ResourceExt;

use multicloud_operator::controller::dependents::{Dependents, component_name, desired_services};
use multicloud_operator::controller::error::Result;
use multicloud_operator::controller::pipeline::StepOutcome;
use multicloud_operator::crd::{Cluster, ManagedResource, Service, Status};

use crate::common::*;

const NS: &str = "team-a";
const POLL: Duration = Duration::from_secs(10);

/// Cluster declaring its admin services with priorities [2, 1, 3]
fn cluster() -> Cluster {
    test_cluster(
        "prod",
        NS,
        vec![
            admin_service("logging", 2),
            admin_service("metrics", 1),
            admin_service("tracing", 3),
        ],
    )
}

fn desired(cluster: &Cluster) -> Vec<Service> {
    desired_services(cluster, &cluster.name_any(), &cluster.spec.admin_services)
}

async fn ensure(dependents: &Dependents<'_>, cluster: &mut Cluster) -> Result<StepOutcome> {
    let want = desired(cluster);
    dependents.ensure(cluster, &want).await
}

async fn teardown(dependents: &Dependents<'_>, cluster: &mut Cluster) -> Result<StepOutcome> {
    let want = desired(cluster);
    dependents.teardown(cluster, &want).await
}

/// Drive `ensure` until it continues, marking each new child ready
async fn converge(store: &MemoryStore<Service>, cluster: &mut Cluster) {
    let dependents = Dependents::new(store, POLL);
    for _ in 0..10 {
        let outcome = ensure(&dependents, cluster).await.unwrap();
        if outcome.is_continue() {
            return;
        }
        for name in store.names() {
            store.set_status(NS, &name, Status::Success, "");
        }
    }
    panic!("dependents did not converge");
}

#[tokio::test]
async fn test_creates_one_child_at_a_time_in_priority_order() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    let dependents = Dependents::new(&store, POLL);

    let outcome = ensure(&dependents, &mut cluster).await.unwrap();
    assert_eq!(outcome, StepOutcome::RequeueAfter(POLL));
    assert_eq!(store.created(), vec!["metrics"]);

    // Nothing else starts until the first child is ready
    ensure(&dependents, &mut cluster).await.unwrap();
    assert_eq!(store.created(), vec!["metrics"]);
    let components = &cluster.resource_status().unwrap().components;
    assert_eq!(components.status_of(&component_name("metrics")), Status::Pending);

    store.set_status(NS, "metrics", Status::Success, "");
    ensure(&dependents, &mut cluster).await.unwrap();
    assert_eq!(store.created(), vec!["metrics", "logging"]);

    store.set_status(NS, "logging", Status::Success, "");
    ensure(&dependents, &mut cluster).await.unwrap();
    store.set_status(NS, "tracing", Status::Success, "");
    let outcome = ensure(&dependents, &mut cluster).await.unwrap();

    assert!(outcome.is_continue());
    assert_eq!(store.created(), vec!["metrics", "logging", "tracing"]);
    let components = &cluster.resource_status().unwrap().components;
    assert!(components.has_status_for_all(Status::Success));
    assert_eq!(components.len(), 3);
}

#[tokio::test]
async fn test_children_are_labelled_and_owned() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    ensure(&Dependents::new(&store, POLL), &mut cluster).await.unwrap();

    let child = store.object(NS, "metrics").unwrap();
    assert_eq!(child.spec.cluster.as_deref(), Some("prod"));
    assert_eq!(child.labels()["multicloud.io/owner-kind"], "Cluster");
    assert_eq!(child.labels()["multicloud.io/owner-name"], "prod");
    assert_eq!(child.annotations()["multicloud.io/priority"], "1");
    assert_eq!(child.owner_references()[0].uid, "uid-prod");
}

#[tokio::test]
async fn test_failed_child_blocks_the_rest() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    let dependents = Dependents::new(&store, POLL);

    ensure(&dependents, &mut cluster).await.unwrap();
    store.set_status(NS, "metrics", Status::Success, "");
    ensure(&dependents, &mut cluster).await.unwrap();
    store.set_status(NS, "logging", Status::Failure, "quota exceeded");

    let err = ensure(&dependents, &mut cluster).await.unwrap_err();
    assert!(err.is_critical());
    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(store.created(), vec!["metrics", "logging"]);

    let components = &cluster.resource_status().unwrap().components;
    assert_eq!(components.status_of(&component_name("logging")), Status::Failure);
    assert_eq!(components.status_of(&component_name("tracing")), Status::Unknown);
}

#[tokio::test]
async fn test_retrying_child_waits() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    let dependents = Dependents::new(&store, POLL);

    ensure(&dependents, &mut cluster).await.unwrap();
    store.set_status(NS, "metrics", Status::Error, "broker timeout");

    let outcome = ensure(&dependents, &mut cluster).await.unwrap();
    assert_eq!(outcome, StepOutcome::RequeueAfter(POLL));
    let component = cluster
        .resource_status()
        .unwrap()
        .components
        .get_component(&component_name("metrics"))
        .cloned()
        .unwrap();
    assert_eq!(component.status, Status::Error);
    assert_eq!(component.detail, "broker timeout");
}

#[tokio::test]
async fn test_teardown_runs_in_reverse_priority_order() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    converge(&store, &mut cluster).await;
    store.clear_events();

    let dependents = Dependents::new(&store, POLL);
    let mut passes = 0;
    loop {
        let outcome = teardown(&dependents, &mut cluster).await.unwrap();
        if outcome.is_continue() {
            break;
        }
        passes += 1;
        assert!(passes < 10);
    }

    assert_eq!(store.deleted(), vec!["tracing", "logging", "metrics"]);
    assert!(store.names().is_empty());
    assert!(cluster.resource_status().unwrap().components.is_empty());
}

#[tokio::test]
async fn test_teardown_waits_for_child_deletion() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    converge(&store, &mut cluster).await;
    store.update(NS, "tracing", |s| {
        s.metadata.finalizers = Some(vec!["multicloud.io/service-finalizer".to_string()]);
    });
    store.clear_events();

    let dependents = Dependents::new(&store, POLL);
    for _ in 0..3 {
        let outcome = teardown(&dependents, &mut cluster).await.unwrap();
        assert_eq!(outcome, StepOutcome::RequeueAfter(POLL));
    }

    // The child is marked once and nothing else is touched meanwhile
    assert_eq!(store.deleted(), vec!["tracing"]);
    let components = &cluster.resource_status().unwrap().components;
    assert_eq!(components.status_of(&component_name("tracing")), Status::Deleting);
}

#[tokio::test]
async fn test_teardown_stops_on_delete_failed_child() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    converge(&store, &mut cluster).await;
    store.set_status(NS, "tracing", Status::DeleteFailed, "broker refused");

    let err = teardown(&Dependents::new(&store, POLL), &mut cluster)
        .await
        .unwrap_err();
    assert!(err.is_critical());
    assert!(store.object(NS, "logging").is_some());
}

#[tokio::test]
async fn test_removed_admin_service_is_pruned() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    converge(&store, &mut cluster).await;
    store.clear_events();

    cluster.spec.admin_services.retain(|s| s.name != "logging");
    converge(&store, &mut cluster).await;

    assert_eq!(store.deleted(), vec!["logging"]);
    let components = &cluster.resource_status().unwrap().components;
    assert!(components.get_component(&component_name("logging")).is_none());
    assert_eq!(components.len(), 2);
}

#[tokio::test]
async fn test_changed_admin_service_is_patched() {
    let store = MemoryStore::<Service>::new();
    let mut cluster = cluster();
    converge(&store, &mut cluster).await;
    store.clear_events();

    cluster.spec.admin_services[1].plan = "large".to_string();
    let outcome = ensure(&Dependents::new(&store, POLL), &mut cluster)
        .await
        .unwrap();

    assert_eq!(outcome, StepOutcome::RequeueAfter(POLL));
    assert_eq!(
        store.events(),
        vec![StoreEvent::SpecPatched("metrics".to_string())]
    );
    assert_eq!(store.object(NS, "metrics").unwrap().spec.plan, "large");
}

#[tokio::test]
async fn test_foreign_service_with_same_name_is_a_conflict() {
    let store = MemoryStore::<Service>::new();
    store.insert(test_service("metrics", NS, "broker"));
    let mut cluster = cluster();

    let err = ensure(&Dependents::new(&store, POLL), &mut cluster)
        .await
        .unwrap_err();
    assert!(err.is_critical());
    assert!(store.created().is_empty());
    assert_eq!(
        cluster
            .resource_status()
            .unwrap()
            .components
            .status_of(&component_name("metrics")),
        Status::Failure
    );
}
