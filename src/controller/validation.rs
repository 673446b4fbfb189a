//! Validation of Cluster and Feature specs
//!
//! Invalid specs are terminal: they are reported as
//! [`Error::ValidationError`] and the resource stays `Failure` until the spec
//! is changed.

use std::collections::HashSet;

use crate::controller::error::{Error, Result};
use crate::crd::{AdminServiceSpec, Cluster, Feature};

/// Longest name a Kubernetes object may carry
pub const MAX_NAME_LENGTH: usize = 253;

/// Validate a Cluster spec
pub fn validate_cluster(cluster: &Cluster) -> Result<()> {
    if cluster.spec.region.trim().is_empty() {
        return Err(Error::ValidationError(
            "cluster region must not be empty".to_string(),
        ));
    }
    validate_admin_services(&cluster.spec.admin_services)
}

/// Validate a Feature spec
pub fn validate_feature(feature: &Feature) -> Result<()> {
    if feature.spec.cluster.trim().is_empty() {
        return Err(Error::ValidationError(
            "feature must name the cluster it applies to".to_string(),
        ));
    }
    validate_admin_services(&feature.spec.admin_services)
}

/// Admin services need unique, valid names and a provider
pub fn validate_admin_services(services: &[AdminServiceSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for service in services {
        validate_name(&service.name)?;
        if !seen.insert(service.name.as_str()) {
            return Err(Error::ValidationError(format!(
                "admin service '{}' is declared more than once",
                service.name
            )));
        }
        if service.provider.trim().is_empty() {
            return Err(Error::ValidationError(format!(
                "admin service '{}' does not name a provider",
                service.name
            )));
        }
        if service.kind.trim().is_empty() {
            return Err(Error::ValidationError(format!(
                "admin service '{}' does not name a service kind",
                service.name
            )));
        }
    }
    Ok(())
}

/// RFC 1123 subdomain check for names of generated objects
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ValidationError(
            "admin service name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::ValidationError(format!(
            "admin service name '{}' is longer than {} characters",
            name, MAX_NAME_LENGTH
        )));
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_ends = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if !valid_chars || !valid_ends {
        return Err(Error::ValidationError(format!(
            "admin service name '{}' must consist of lower case alphanumeric characters, '-' or '.'",
            name
        )));
    }
    Ok(())
}
