// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for the status model, dependent ordering and the
//! reconciliation engine
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Component upserts are idempotent and keep names unique
//! 2. Priority ordering is stable for equal priorities
//! 3. Admin service validation accepts exactly the well-formed sets
//! 4. Backoff never exceeds its cap
//! 5. A terminal status never changes without a new generation

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use proptest::prelude::*;

use multicloud_operator::controller::dependents::{desired_services, sort_by_priority};
use multicloud_operator::controller::engine::{Engine, EngineConfig, ResourceHandler};
use multicloud_operator::controller::error::{BackoffConfig, Error, Result};
use multicloud_operator::controller::pipeline::{EnsureStep, StepOutcome};
use multicloud_operator::controller::validation::validate_admin_services;
use multicloud_operator::crd::{Cluster, Component, Components, ManagedResource, Status};

#[path = "../common/mod.rs"]
mod common;

use common::*;

// =============================================================================
// Strategies
// =============================================================================

fn status() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Pending),
        Just(Status::Success),
        Just(Status::Error),
        Just(Status::Failure),
        Just(Status::Deleting),
        Just(Status::Deleted),
        Just(Status::DeleteFailed),
        Just(Status::Warning),
        Just(Status::Unknown),
    ]
}

fn component() -> impl Strategy<Value = Component> {
    ("[a-d]", status(), "[a-z ]{0,12}")
        .prop_map(|(name, status, message)| Component::new(name, status).with_message(message))
}

fn service_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}[a-z0-9]"
}

/// Distinct, well-formed names with arbitrary priorities
fn admin_services() -> impl Strategy<Value = Vec<(String, i32)>> {
    prop::collection::hash_set(service_name(), 0..8).prop_flat_map(|names| {
        let names: Vec<String> = names.into_iter().collect();
        let len = names.len();
        (Just(names), prop::collection::vec(-5..5i32, len))
            .prop_map(|(names, priorities)| names.into_iter().zip(priorities).collect::<Vec<_>>())
    })
}

fn retryable_error() -> impl Strategy<Value = Error> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(Error::NotReady),
        "[a-z ]{1,20}".prop_map(Error::NotFound),
    ]
}

// =============================================================================
// Engine helpers
// =============================================================================

/// Handler whose single step always returns the same result
struct Fixed(fn() -> Result<StepOutcome>);

struct FixedStep(fn() -> Result<StepOutcome>);

#[async_trait]
impl EnsureStep<Cluster> for FixedStep {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn attempt(&self, _: &mut Cluster) -> Result<StepOutcome> {
        (self.0)()
    }
}

#[async_trait]
impl ResourceHandler<Cluster> for Fixed {
    fn ensure_steps(&self) -> Vec<Box<dyn EnsureStep<Cluster> + '_>> {
        vec![Box::new(FixedStep(self.0))]
    }

    async fn teardown(&self, _: &mut Cluster) -> Result<StepOutcome> {
        (self.0)()
    }
}

const OUTCOMES: [fn() -> Result<StepOutcome>; 4] = [
    || Ok(StepOutcome::Continue),
    || Ok(StepOutcome::Requeue),
    || Err(Error::NotReady("later".to_string())),
    || Err(Error::critical("broken")),
];

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// =============================================================================
// Property-based tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Upserting the same component twice equals upserting it once
    #[test]
    fn prop_set_condition_idempotent(
        existing in prop::collection::vec(component(), 0..6),
        new in component(),
    ) {
        let mut once = Components::new();
        for c in existing {
            once.set_condition(c);
        }
        once.set_condition(new.clone());

        let mut twice = once.clone();
        twice.set_condition(new.clone());

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.get_component(&new.name), Some(&new));
    }

    /// Property: Component names stay unique whatever is upserted
    #[test]
    fn prop_component_names_unique(components in prop::collection::vec(component(), 0..20)) {
        let mut all = Components::new();
        let mut expected = HashSet::new();
        for c in components {
            expected.insert(c.name.clone());
            all.set_condition(c);
        }

        let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        prop_assert_eq!(names.len(), unique.len());
        prop_assert_eq!(unique.len(), expected.len());
    }

    /// Property: Sorting by priority is ordered and stable
    #[test]
    fn prop_priority_sort_stable(priorities in prop::collection::vec(-3..3i32, 0..30)) {
        let mut items: Vec<(usize, i32)> = priorities.into_iter().enumerate().collect();
        sort_by_priority(&mut items, |i| i.1);

        for pair in items.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].1);
            if pair[0].1 == pair[1].1 {
                prop_assert!(pair[0].0 < pair[1].0, "declaration order must survive");
            }
        }
    }

    /// Property: Desired children come out in priority order
    #[test]
    fn prop_desired_services_sorted(services in admin_services()) {
        let specs: Vec<_> = services
            .iter()
            .map(|(name, priority)| admin_service(name, *priority))
            .collect();
        let cluster = test_cluster("prod", "team-a", specs.clone());
        let desired = desired_services(&cluster, "prod", &specs);

        prop_assert_eq!(desired.len(), specs.len());
        let priorities: Vec<i32> = desired
            .iter()
            .map(|d| specs.iter().find(|s| s.name == d.name_any()).unwrap().priority)
            .collect();
        prop_assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
    }

    /// Property: Distinct well-formed names always validate
    #[test]
    fn prop_valid_admin_services_accepted(services in admin_services()) {
        let specs: Vec<_> = services
            .iter()
            .map(|(name, priority)| admin_service(name, *priority))
            .collect();
        let result = validate_admin_services(&specs);
        prop_assert!(result.is_ok(), "Valid admin services should pass: {:?}", result);
    }

    /// Property: A repeated name is always rejected as critical
    #[test]
    fn prop_duplicate_admin_service_rejected(name in service_name(), a in -5..5i32, b in -5..5i32) {
        let specs = vec![admin_service(&name, a), admin_service(&name, b)];
        let err = validate_admin_services(&specs).unwrap_err();
        prop_assert!(err.is_critical());
    }

    /// Property: Backoff for retryable errors never exceeds the cap
    #[test]
    fn prop_backoff_capped(attempt in 0u32..100, error in retryable_error()) {
        let backoff = BackoffConfig::default();
        let delay = backoff.delay_for_error(&error, attempt);
        prop_assert!(delay <= backoff.max_delay);
    }

    /// Property: A Failure recorded at the current generation is never
    /// overwritten, whatever the steps would return
    #[test]
    fn prop_failure_is_sticky(outcome in 0..OUTCOMES.len(), passes in 1..4usize) {
        let store = MemoryStore::<Cluster>::new();
        store.insert(test_cluster("prod", "team-a", vec![]));
        let config = EngineConfig {
            finalizer: "multicloud.io/cluster-finalizer",
            dependency_requeue: Duration::from_secs(30),
            resync_interval: Duration::from_secs(300),
        };

        block_on(async {
            let engine = Engine::new(&store, &config);
            let broken = Fixed(OUTCOMES[3]);
            engine.reconcile("team-a", "prod", &broken).await.unwrap();
            assert_eq!(store.status("team-a", "prod").unwrap().status, Status::Failure);

            store.clear_events();
            let handler = Fixed(OUTCOMES[outcome]);
            for _ in 0..passes {
                engine.reconcile("team-a", "prod", &handler).await.unwrap();
            }
        });

        prop_assert!(store.events().is_empty());
        prop_assert_eq!(store.status("team-a", "prod").unwrap().status, Status::Failure);
        prop_assert!(store.object("team-a", "prod").unwrap().resource_status().is_some());
    }
}
