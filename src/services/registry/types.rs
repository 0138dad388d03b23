use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registration::ServiceRegistration;
use crate::services::error::FactoryError;
use crate::services::hooks::{EventHook, FindHook, ListenerHook};

pub type ServiceId = u64;

// 保留属性键
pub const OBJECT_CLASS: &str = "objectClass";
pub const SERVICE_ID: &str = "service.id";
pub const SERVICE_RANKING: &str = "service.ranking";

/// 查找时匹配所有类型
pub const ANY_TYPE: &str = "*";

/// 模块标识，由外部生命周期管理器分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

impl ModuleId {
    /// 注册表自身的身份，用于获取钩子对象
    pub const SYSTEM: ModuleId = ModuleId(0);
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// 注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 是否调用 EventHook / FindHook / ListenerHook
    pub enable_hooks: bool,
    /// 监听器总数上限
    pub max_listeners: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enable_hooks: true,
            max_listeners: 10_000,
        }
    }
}

/// 不透明的服务对象句柄，可附带钩子能力
#[derive(Clone)]
pub struct ServiceObject {
    value: Arc<dyn Any + Send + Sync>,
    event_hook: Option<Arc<dyn EventHook>>,
    find_hook: Option<Arc<dyn FindHook>>,
    listener_hook: Option<Arc<dyn ListenerHook>>,
}

impl ServiceObject {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            event_hook: None,
            find_hook: None,
            listener_hook: None,
        }
    }

    pub fn event_hook<H: EventHook + 'static>(hook: H) -> Self {
        let hook = Arc::new(hook);
        Self::from_arc(hook.clone()).with_event_hook(hook)
    }

    pub fn find_hook<H: FindHook + 'static>(hook: H) -> Self {
        let hook = Arc::new(hook);
        Self::from_arc(hook.clone()).with_find_hook(hook)
    }

    pub fn listener_hook<H: ListenerHook + 'static>(hook: H) -> Self {
        let hook = Arc::new(hook);
        Self::from_arc(hook.clone()).with_listener_hook(hook)
    }

    pub fn with_event_hook(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.event_hook = Some(hook);
        self
    }

    pub fn with_find_hook(mut self, hook: Arc<dyn FindHook>) -> Self {
        self.find_hook = Some(hook);
        self
    }

    pub fn with_listener_hook(mut self, hook: Arc<dyn ListenerHook>) -> Self {
        self.listener_hook = Some(hook);
        self
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn as_event_hook(&self) -> Option<&Arc<dyn EventHook>> {
        self.event_hook.as_ref()
    }

    pub fn as_find_hook(&self) -> Option<&Arc<dyn FindHook>> {
        self.find_hook.as_ref()
    }

    pub fn as_listener_hook(&self) -> Option<&Arc<dyn ListenerHook>> {
        self.listener_hook.as_ref()
    }

    /// 是否指向同一个底层对象
    pub fn same_object(&self, other: &ServiceObject) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.value), Arc::as_ptr(&other.value))
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObject")
            .field("event_hook", &self.event_hook.is_some())
            .field("find_hook", &self.find_hook.is_some())
            .field("listener_hook", &self.listener_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// 按消费者创建服务对象的工厂
pub trait ServiceFactory: Send + Sync {
    fn get_service(
        &self,
        consumer: ModuleId,
        registration: &ServiceRegistration,
    ) -> Result<ServiceObject, FactoryError>;

    fn unget_service(
        &self,
        _consumer: ModuleId,
        _registration: &ServiceRegistration,
        _service: ServiceObject,
    ) -> Result<(), FactoryError> {
        Ok(())
    }
}

/// 注册时提供的服务：共享对象或工厂
#[derive(Clone)]
pub enum ServiceSource {
    Object(ServiceObject),
    Factory(Arc<dyn ServiceFactory>),
}

impl ServiceSource {
    pub fn factory<F: ServiceFactory + 'static>(factory: F) -> Self {
        ServiceSource::Factory(Arc::new(factory))
    }

    pub fn is_factory(&self) -> bool {
        matches!(self, ServiceSource::Factory(_))
    }
}

impl From<ServiceObject> for ServiceSource {
    fn from(object: ServiceObject) -> Self {
        ServiceSource::Object(object)
    }
}

impl fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSource::Object(object) => f.debug_tuple("Object").field(object).finish(),
            ServiceSource::Factory(_) => f.write_str("Factory"),
        }
    }
}
