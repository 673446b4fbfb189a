//! Dependent-resource orchestration
//!
//! A parent (Cluster or Feature) owns a set of child `Service` objects. They
//! are created in ascending priority order, one at a time: a child must reach
//! `Success` before the next one is touched. Teardown walks the same list in
//! reverse and waits for each deletion to finish before starting the next.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::pipeline::StepOutcome;
use crate::crd::{
    AdminServiceSpec, Component, ManagedResource, PRIORITY_ANNOTATION, Service, ServiceSpec,
    Status,
};
use crate::resources::common::{is_owned_by, owner_labels, owner_reference, owner_selector};
use crate::store::ResourceStore;

/// Component name tracking a child service on its parent
pub fn component_name(child: &str) -> String {
    format!("Service/{child}")
}

/// Stable sort by ascending priority; equal priorities keep declaration order
pub fn sort_by_priority<T>(items: &mut [T], priority: impl Fn(&T) -> i32) {
    items.sort_by_key(|item| priority(item));
}

/// Priority recorded on a child, 0 when missing or malformed
pub fn child_priority(child: &Service) -> i32 {
    child
        .annotations()
        .get(PRIORITY_ANNOTATION)
        .and_then(|p| p.parse().ok())
        .unwrap_or_default()
}

/// Build the child services of `parent`, sorted by priority
pub fn desired_services<P: ManagedResource>(
    parent: &P,
    cluster: &str,
    specs: &[AdminServiceSpec],
) -> Vec<Service> {
    let mut specs: Vec<&AdminServiceSpec> = specs.iter().collect();
    sort_by_priority(&mut specs, |s| s.priority);

    specs
        .into_iter()
        .map(|spec| {
            let mut child = Service::new(
                &spec.name,
                ServiceSpec {
                    provider: spec.provider.clone(),
                    kind: spec.kind.clone(),
                    plan: spec.plan.clone(),
                    cluster: Some(cluster.to_string()),
                    configuration: spec.configuration.clone(),
                },
            );
            child.metadata.namespace = parent.namespace();
            child.metadata.labels = Some(owner_labels(parent));
            child.metadata.annotations = Some(BTreeMap::from([(
                PRIORITY_ANNOTATION.to_string(),
                spec.priority.to_string(),
            )]));
            child.metadata.owner_references = Some(vec![owner_reference(parent)]);
            child
        })
        .collect()
}

/// Structural difference between the desired and live child, ignoring status
fn needs_update(live: &Service, desired: &Service) -> bool {
    let labels_differ = desired
        .labels()
        .iter()
        .any(|(k, v)| live.labels().get(k) != Some(v));
    let annotations_differ = desired
        .annotations()
        .iter()
        .any(|(k, v)| live.annotations().get(k) != Some(v));
    live.spec != desired.spec || labels_differ || annotations_differ
}

pub struct Dependents<'a> {
    store: &'a dyn ResourceStore<Service>,
    poll_interval: Duration,
}

impl<'a> Dependents<'a> {
    pub fn new(store: &'a dyn ResourceStore<Service>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Children of `parent` currently in the store, keyed by name
    async fn owned<P: ManagedResource>(&self, parent: &P) -> Result<HashMap<String, Service>> {
        let ns = parent.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let children = self
            .store
            .list(&ns, Some(&owner_selector(parent)))
            .await?;
        Ok(children
            .into_iter()
            .filter(|c| is_owned_by(c, parent))
            .map(|c| (c.name_any(), c))
            .collect())
    }

    /// Converge the children of `parent` to `desired`, which must be sorted
    pub async fn ensure<P: ManagedResource>(
        &self,
        parent: &mut P,
        desired: &[Service],
    ) -> Result<StepOutcome> {
        let ns = parent.namespace().ok_or(Error::MissingObjectKey("namespace"))?;

        for child in desired {
            let name = child.name_any();
            let component = component_name(&name);
            let components = &mut parent.resource_status_mut().components;
            components.set_condition(
                Component::new(&component, Status::Pending).with_resource(child.reference()),
            );

            let live = match self.store.get(&ns, &name).await? {
                None => {
                    info!("Creating dependent service {}", name);
                    self.store.create(&ns, child).await?;
                    components.set_status(&component, Status::Pending, "Creating", "");
                    return Ok(StepOutcome::RequeueAfter(self.poll_interval));
                }
                Some(live) => live,
            };

            if !is_owned_by(&live, &*parent) {
                let message = format!("service {name} exists and belongs to another owner");
                let components = &mut parent.resource_status_mut().components;
                components.set_status(&component, Status::Failure, "Name conflict", &message);
                return Err(Error::critical(message));
            }

            let components = &mut parent.resource_status_mut().components;
            if needs_update(&live, child) {
                info!("Updating dependent service {}", name);
                self.store.patch_spec(&ns, child).await?;
                components.set_status(&component, Status::Pending, "Updating", "");
                return Ok(StepOutcome::RequeueAfter(self.poll_interval));
            }

            let message = live
                .resource_status()
                .map(|s| s.message.clone())
                .unwrap_or_default();
            match live.current_status() {
                Status::Success => {
                    components.set_status(&component, Status::Success, "", "");
                }
                Status::Failure | Status::DeleteFailed => {
                    components.set_status(&component, Status::Failure, "Dependent service failed", &message);
                    return Err(Error::critical(format!(
                        "dependent service {name} failed: {message}"
                    )));
                }
                Status::Error => {
                    components.set_status(&component, Status::Error, "Dependent service is retrying", &message);
                    return Ok(StepOutcome::RequeueAfter(self.poll_interval));
                }
                other => {
                    debug!("Dependent service {} is {}", name, other);
                    components.set_status(&component, Status::Pending, "Waiting for service", &message);
                    return Ok(StepOutcome::RequeueAfter(self.poll_interval));
                }
            }
        }

        self.prune(parent, desired).await
    }

    /// Delete owned children no longer desired, one at a time
    async fn prune<P: ManagedResource>(&self, parent: &mut P, desired: &[Service]) -> Result<StepOutcome> {
        let owned = self.owned(parent).await?;
        let mut extra: Vec<&Service> = owned
            .values()
            .filter(|c| !desired.iter().any(|d| d.name_any() == c.name_any()))
            .collect();
        extra.sort_by_key(|c| (std::cmp::Reverse(child_priority(c)), c.name_any()));

        if let Some(child) = extra.first() {
            return self.delete_child(parent, child).await;
        }

        self.forget_missing(parent, &owned);
        Ok(StepOutcome::Continue)
    }

    /// Remove every child in reverse priority order; `Continue` once all are gone
    pub async fn teardown<P: ManagedResource>(
        &self,
        parent: &mut P,
        desired: &[Service],
    ) -> Result<StepOutcome> {
        let owned = self.owned(parent).await?;

        let mut order: Vec<&Service> = owned
            .values()
            .filter(|c| !desired.iter().any(|d| d.name_any() == c.name_any()))
            .collect();
        order.sort_by_key(|c| (std::cmp::Reverse(child_priority(c)), c.name_any()));
        order.extend(
            desired
                .iter()
                .rev()
                .filter_map(|d| owned.get(&d.name_any())),
        );

        if let Some(child) = order.first() {
            return self.delete_child(parent, child).await;
        }

        self.forget_missing(parent, &owned);
        Ok(StepOutcome::Continue)
    }

    async fn delete_child<P: ManagedResource>(&self, parent: &mut P, child: &Service) -> Result<StepOutcome> {
        let name = child.name_any();
        let component = component_name(&name);
        let components = &mut parent.resource_status_mut().components;

        if child.current_status() == Status::DeleteFailed {
            let message = child
                .resource_status()
                .map(|s| s.message.clone())
                .unwrap_or_default();
            components.set_status(&component, Status::DeleteFailed, "Dependent service could not be deleted", &message);
            return Err(Error::critical(format!(
                "dependent service {name} could not be deleted: {message}"
            )));
        }

        if child.meta().deletion_timestamp.is_none() {
            let ns = child.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
            info!("Deleting dependent service {}", name);
            self.store.delete(&ns, &name).await?;
        }
        components.set_condition(
            Component::new(&component, Status::Deleting)
                .with_message("Waiting for deletion")
                .with_resource(child.reference()),
        );
        Ok(StepOutcome::RequeueAfter(self.poll_interval))
    }

    /// Drop components of children that no longer exist
    fn forget_missing<P: ManagedResource>(&self, parent: &mut P, owned: &HashMap<String, Service>) {
        let components = &mut parent.resource_status_mut().components;
        let stale: Vec<String> = components
            .iter()
            .filter_map(|c| c.name.strip_prefix("Service/"))
            .filter(|n| !owned.contains_key(*n))
            .map(component_name)
            .collect();
        for name in stale {
            components.remove(&name);
        }
    }
}
