//! Service broker integration
//!
//! - [`client`]: protocol types and the [`BrokerClient`] trait
//! - [`http`]: Open Service Broker REST client
//! - [`state_machine`]: provision, update, bind and teardown state machine

pub mod client;
pub mod http;
pub mod state_machine;

pub use client::{BrokerClient, BrokerError, BrokerResult};
pub use http::{HttpBrokerClient, HttpBrokerConfig};
pub use state_machine::{
    BindingResult, BindingSpec, BrokerStateMachine, Credentials, InstanceSpec, OperationData,
};
