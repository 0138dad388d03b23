use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use super::filter::FilterError;
use super::registry::types::{ModuleId, ServiceId};

/// 注册表操作错误
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid registration {service_id}: {reason}")]
    InvalidRegistration {
        service_id: ServiceId,
        reason: &'static str,
    },

    #[error(transparent)]
    FilterSyntax(#[from] FilterError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Duplicate service property: {key}")]
    DuplicateProperty { key: String },

    #[error("Listener limit exceeded: {limit}")]
    ListenerLimitExceeded { limit: usize },

    #[error("Service registry has been shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// 钩子回调失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    #[error("Hook failed: {0}")]
    Failed(String),

    #[error("Service {service_id} does not implement {hook}")]
    NotImplemented {
        service_id: ServiceId,
        hook: &'static str,
    },

    #[error("Hook panicked: {0}")]
    Panicked(String),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 服务工厂失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FactoryError {
    #[error("Service factory failed: {0}")]
    Failed(String),

    #[error("Service factory recursion for service {service_id} and {consumer}")]
    Recursion {
        service_id: ServiceId,
        consumer: ModuleId,
    },

    #[error("Service factory panicked: {0}")]
    Panicked(String),
}

impl FactoryError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

// 执行用户代码，将 panic 转换为错误消息
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> std::result::Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
