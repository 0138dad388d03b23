//! Service registry module
//!
//! This module contains the registry implementation split into logical components:
//! - `types`: identifiers, service objects, factories and configuration
//! - `properties`: case-insensitive service properties
//! - `registration`: registrations and the references handed to consumers
//! - `index`: the type, owner and hook indices
//! - `usage`: per-consumer service objects and reference counts
//! - `service`: the `ServiceRegistry` facade

pub(crate) mod index;
pub mod properties;
pub mod registration;
pub mod service;
pub mod types;
pub(crate) mod usage;

// Re-export public types for easier access
pub use properties::{Properties, PropertyValue};
pub use registration::{RegistrationState, ServiceReference, ServiceRegistration, sort_references};
pub use service::ServiceRegistry;
pub use types::{
    ANY_TYPE, ModuleId, OBJECT_CLASS, RegistryConfig, SERVICE_ID, SERVICE_RANKING, ServiceFactory,
    ServiceId, ServiceObject, ServiceSource,
};
