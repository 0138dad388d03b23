pub mod error;
pub mod event;
pub mod filter;
pub mod hooks;
pub mod registry;

pub use error::{FactoryError, HookError, RegistryError, Result};
pub use filter::{Filter, FilterError};
pub use registry::{
    ModuleId, Properties, PropertyValue, ServiceObject, ServiceReference, ServiceRegistration,
    ServiceRegistry,
};
