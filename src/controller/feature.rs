//! Feature controller
//!
//! A Feature installs its admin services on a cluster once that cluster is
//! ready. Disabling the feature removes them again.

use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use crate::controller::dependents::{Dependents, desired_services};
use crate::controller::engine::ResourceHandler;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::{EnsureStep, StepOutcome};
use crate::controller::validation::validate_feature;
use crate::crd::{Cluster, Component, Feature, ManagedResource, Service, Status};
use crate::store::ResourceStore;

pub const FEATURE_FINALIZER: &str = "multicloud.io/feature-finalizer";

fn cluster_component(name: &str) -> String {
    format!("Cluster/{name}")
}

pub struct FeatureHandler<'a> {
    clusters: &'a dyn ResourceStore<Cluster>,
    services: &'a dyn ResourceStore<Service>,
    poll_interval: Duration,
}

impl<'a> FeatureHandler<'a> {
    pub fn new(
        clusters: &'a dyn ResourceStore<Cluster>,
        services: &'a dyn ResourceStore<Service>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            clusters,
            services,
            poll_interval,
        }
    }

    fn dependents(&self) -> Dependents<'a> {
        Dependents::new(self.services, self.poll_interval)
    }
}

struct ValidateFeature;

#[async_trait]
impl EnsureStep<Feature> for ValidateFeature {
    fn name(&self) -> &'static str {
        "validate-feature"
    }

    async fn attempt(&self, feature: &mut Feature) -> Result<StepOutcome> {
        validate_feature(feature)?;
        Ok(StepOutcome::Continue)
    }
}

/// Waits for the target cluster to be ready; skipped for disabled features
struct WaitForCluster<'a> {
    clusters: &'a dyn ResourceStore<Cluster>,
}

#[async_trait]
impl EnsureStep<Feature> for WaitForCluster<'_> {
    fn name(&self) -> &'static str {
        "wait-for-cluster"
    }

    async fn attempt(&self, feature: &mut Feature) -> Result<StepOutcome> {
        if !feature.spec.enabled {
            return Ok(StepOutcome::Continue);
        }
        let ns = feature.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = feature.spec.cluster.clone();
        let component = cluster_component(&name);

        let Some(cluster) = self.clusters.get(&ns, &name).await? else {
            feature.resource_status_mut().components.set_condition(
                Component::new(&component, Status::Pending).with_message("Cluster does not exist"),
            );
            return Err(Error::NotReady(format!("cluster {name} does not exist")));
        };

        let status = cluster.current_status();
        let ready = status == Status::Success;
        feature.resource_status_mut().components.set_condition(
            Component::new(&component, if ready { Status::Success } else { Status::Pending })
                .with_message(if ready { String::new() } else { format!("Cluster is {status}") })
                .with_resource(cluster.reference()),
        );
        if !ready {
            return Err(Error::NotReady(format!("cluster {name} is not ready")));
        }
        Ok(StepOutcome::Continue)
    }
}

struct EnsureFeatureServices<'a> {
    dependents: Dependents<'a>,
}

#[async_trait]
impl EnsureStep<Feature> for EnsureFeatureServices<'_> {
    fn name(&self) -> &'static str {
        "ensure-feature-services"
    }

    async fn attempt(&self, feature: &mut Feature) -> Result<StepOutcome> {
        let desired = desired_services(&*feature, &feature.spec.cluster, &feature.spec.admin_services);
        if feature.spec.enabled {
            return self.dependents.ensure(feature, &desired).await;
        }

        let outcome = self.dependents.teardown(feature, &desired).await?;
        if outcome.is_continue() {
            info!("Feature {} is disabled, admin services removed", feature.name_any());
            let component = cluster_component(&feature.spec.cluster);
            feature.resource_status_mut().components.remove(&component);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl ResourceHandler<Feature> for FeatureHandler<'_> {
    fn ensure_steps(&self) -> Vec<Box<dyn EnsureStep<Feature> + '_>> {
        vec![
            Box::new(ValidateFeature),
            Box::new(WaitForCluster {
                clusters: self.clusters,
            }),
            Box::new(EnsureFeatureServices {
                dependents: self.dependents(),
            }),
        ]
    }

    async fn teardown(&self, feature: &mut Feature) -> Result<StepOutcome> {
        let desired = desired_services(&*feature, &feature.spec.cluster, &feature.spec.admin_services);
        self.dependents().teardown(feature, &desired).await
    }
}
