//! Error types for the traffic crate.

use thiserror::Error;

/// Errors that can occur while administering routes and instance pools.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrafficError {
    /// An instance with the same id is already registered for the service.
    #[error("instance {instance_id} already registered for service {service}")]
    DuplicateInstance {
        /// Logical service name.
        service: String,
        /// Conflicting instance id.
        instance_id: String,
    },

    /// Instance weights must be at least 1.
    #[error("instance {0} has weight 0; weights must be at least 1")]
    InvalidWeight(String),

    /// No pool exists for the service.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The service has no instance with this id.
    #[error("instance {instance_id} not found in service {service}")]
    InstanceNotFound {
        /// Logical service name.
        service: String,
        /// Missing instance id.
        instance_id: String,
    },

    /// A route must allow at least one method.
    #[error("route {0} allows no methods")]
    EmptyMethods(String),
}

/// A specialized Result type for traffic operations.
pub type Result<T> = std::result::Result<T, TrafficError>;
