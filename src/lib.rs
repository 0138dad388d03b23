pub mod config;
pub mod server;
pub mod services;

pub use services::{
    FactoryError, Filter, FilterError, HookError, ModuleId, Properties, PropertyValue,
    RegistryError, ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry,
};
