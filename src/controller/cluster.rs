//! Cluster controller
//!
//! The cloud cluster itself is created by an external adapter. This
//! controller validates the spec and runs the cluster's admin services as
//! dependent `Service` objects.

use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;

use crate::controller::dependents::{Dependents, desired_services};
use crate::controller::engine::ResourceHandler;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::{EnsureStep, StepOutcome};
use crate::controller::validation::validate_cluster;
use crate::crd::{Cluster, Feature, Service};
use crate::resources::common::is_owned_by;
use crate::store::ResourceStore;

pub const CLUSTER_FINALIZER: &str = "multicloud.io/cluster-finalizer";

pub struct ClusterHandler<'a> {
    services: &'a dyn ResourceStore<Service>,
    features: &'a dyn ResourceStore<Feature>,
    poll_interval: Duration,
}

impl<'a> ClusterHandler<'a> {
    pub fn new(
        services: &'a dyn ResourceStore<Service>,
        features: &'a dyn ResourceStore<Feature>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            services,
            features,
            poll_interval,
        }
    }

    fn dependents(&self) -> Dependents<'a> {
        Dependents::new(self.services, self.poll_interval)
    }
}

struct ValidateCluster;

#[async_trait]
impl EnsureStep<Cluster> for ValidateCluster {
    fn name(&self) -> &'static str {
        "validate-cluster"
    }

    async fn attempt(&self, cluster: &mut Cluster) -> Result<StepOutcome> {
        validate_cluster(cluster)?;
        Ok(StepOutcome::Continue)
    }
}

struct EnsureAdminServices<'a> {
    dependents: Dependents<'a>,
}

#[async_trait]
impl EnsureStep<Cluster> for EnsureAdminServices<'_> {
    fn name(&self) -> &'static str {
        "ensure-admin-services"
    }

    async fn attempt(&self, cluster: &mut Cluster) -> Result<StepOutcome> {
        let desired = desired_services(&*cluster, &cluster.name_any(), &cluster.spec.admin_services);
        self.dependents.ensure(cluster, &desired).await
    }
}

#[async_trait]
impl ResourceHandler<Cluster> for ClusterHandler<'_> {
    fn ensure_steps(&self) -> Vec<Box<dyn EnsureStep<Cluster> + '_>> {
        vec![
            Box::new(ValidateCluster),
            Box::new(EnsureAdminServices {
                dependents: self.dependents(),
            }),
        ]
    }

    /// Services deployed onto the cluster by users, and features installed
    /// on it, keep it alive
    async fn dependency_violation(&self, cluster: &Cluster) -> Result<Option<String>> {
        let ns = cluster.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = cluster.name_any();

        let mut services: Vec<String> = self
            .services
            .list(&ns, None)
            .await?
            .into_iter()
            .filter(|s| s.spec.cluster.as_deref() == Some(name.as_str()))
            .filter(|s| !is_owned_by(s, cluster))
            .filter(|s| !s.owner_references().iter().any(|r| r.kind == "Feature"))
            .map(|s| s.name_any())
            .collect();
        let mut features: Vec<String> = self
            .features
            .list(&ns, None)
            .await?
            .into_iter()
            .filter(|f| f.spec.cluster == name)
            .map(|f| f.name_any())
            .collect();

        if services.is_empty() && features.is_empty() {
            return Ok(None);
        }
        services.sort();
        features.sort();

        let mut users = Vec::new();
        if !features.is_empty() {
            users.push(format!("features: {}", features.join(", ")));
        }
        if !services.is_empty() {
            users.push(format!("services: {}", services.join(", ")));
        }
        Ok(Some(format!("cluster is still used by {}", users.join("; "))))
    }

    async fn teardown(&self, cluster: &mut Cluster) -> Result<StepOutcome> {
        let desired = desired_services(&*cluster, &cluster.name_any(), &cluster.spec.admin_services);
        self.dependents().teardown(cluster, &desired).await
    }
}
