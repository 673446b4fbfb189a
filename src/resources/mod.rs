//! Kubernetes object generators

pub mod common;
pub mod secret;
