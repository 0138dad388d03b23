use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use super::properties::{Properties, PropertyValue};
use super::types::{ModuleId, ServiceId, ServiceObject, ServiceSource};
use crate::services::error::{FactoryError, guarded};
use crate::services::hooks::HookKind;

/// 注册状态：Registered -> Unregistering -> Unregistered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Registered,
    Unregistering,
    Unregistered,
}

impl RegistrationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RegistrationState::Registered,
            1 => RegistrationState::Unregistering,
            _ => RegistrationState::Unregistered,
        }
    }
}

pub(crate) struct RegistrationInner {
    id: ServiceId,
    owner: ModuleId,
    types: Vec<String>,
    // 注册时根据声明类型计算一次
    hook_kinds: Vec<HookKind>,
    source: ServiceSource,
    properties: RwLock<Arc<Properties>>,
    state: AtomicU8,
}

/// 服务注册，由注册方持有，用于修改属性和注销
#[derive(Clone)]
pub struct ServiceRegistration {
    inner: Arc<RegistrationInner>,
}

impl ServiceRegistration {
    pub(crate) fn new(
        id: ServiceId,
        owner: ModuleId,
        types: Vec<String>,
        source: ServiceSource,
        properties: Properties,
    ) -> Self {
        let hook_kinds = types
            .iter()
            .filter_map(|name| HookKind::from_type_name(name))
            .collect();
        let properties = properties.with_reserved(id, &types);
        Self {
            inner: Arc::new(RegistrationInner {
                id,
                owner,
                types,
                hook_kinds,
                source,
                properties: RwLock::new(Arc::new(properties)),
                state: AtomicU8::new(0),
            }),
        }
    }

    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    pub fn owner(&self) -> ModuleId {
        self.inner.owner
    }

    pub fn reference(&self) -> ServiceReference {
        ServiceReference {
            inner: self.inner.clone(),
        }
    }

    pub fn state(&self) -> RegistrationState {
        RegistrationState::from_u8(self.inner.state.load(AtomicOrdering::Acquire))
    }

    pub fn is_registered(&self) -> bool {
        self.state() == RegistrationState::Registered
    }

    pub(crate) fn types(&self) -> &[String] {
        &self.inner.types
    }

    pub(crate) fn hook_kinds(&self) -> &[HookKind] {
        &self.inner.hook_kinds
    }

    pub(crate) fn has_hook(&self, kind: HookKind) -> bool {
        self.inner.hook_kinds.contains(&kind)
    }

    pub(crate) fn properties(&self) -> Arc<Properties> {
        self.inner
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn properties_mut(&self) -> RwLockWriteGuard<'_, Arc<Properties>> {
        self.inner
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 仍处于 Registered 状态时替换属性快照，返回旧快照
    ///
    /// 状态检查和替换都在属性写锁内，与 `begin_unregister` 互斥。
    pub(crate) fn replace_properties(&self, properties: Properties) -> Option<Arc<Properties>> {
        let properties = Arc::new(properties.with_reserved(self.inner.id, &self.inner.types));
        let mut guard = self.properties_mut();
        if !self.is_registered() {
            return None;
        }
        Some(std::mem::replace(&mut *guard, properties))
    }

    /// Registered -> Unregistering，只有一个调用方能成功
    pub(crate) fn begin_unregister(&self) -> bool {
        let _guard = self.properties_mut();
        self.inner
            .state
            .compare_exchange(0, 1, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_unregistered(&self) {
        self.inner.state.store(2, AtomicOrdering::Release);
    }

    /// 尚未从索引中移除（注销过程中仍然可用）
    pub(crate) fn is_available(&self) -> bool {
        self.state() != RegistrationState::Unregistered
    }

    pub(crate) fn is_factory(&self) -> bool {
        self.inner.source.is_factory()
    }

    // 为消费者生成服务对象，工厂的错误和 panic 都转换为 FactoryError
    pub(crate) fn produce(&self, consumer: ModuleId) -> Result<ServiceObject, FactoryError> {
        match &self.inner.source {
            ServiceSource::Object(object) => Ok(object.clone()),
            ServiceSource::Factory(factory) => {
                guarded(|| factory.get_service(consumer, self))
                    .map_err(FactoryError::Panicked)
                    .and_then(|result| result)
            }
        }
    }

    pub(crate) fn dispose(&self, consumer: ModuleId, service: ServiceObject) {
        let ServiceSource::Factory(factory) = &self.inner.source else {
            return;
        };
        let result = guarded(|| factory.unget_service(consumer, self, service))
            .map_err(FactoryError::Panicked)
            .and_then(|result| result);
        if let Err(e) = result {
            tracing::warn!(
                service_id = self.inner.id,
                consumer = %consumer,
                error = %e,
                "Service factory failed to release service object"
            );
        }
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("types", &self.inner.types)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for ServiceRegistration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ServiceRegistration {}

/// 指向注册的不可变句柄，按排名降序、服务 ID 升序排序
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<RegistrationInner>,
}

impl ServiceReference {
    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    pub fn owner(&self) -> ModuleId {
        self.inner.owner
    }

    pub fn types(&self) -> &[String] {
        &self.inner.types
    }

    pub fn properties(&self) -> Arc<Properties> {
        self.registration().properties()
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties().get(key).cloned()
    }

    pub fn ranking(&self) -> i64 {
        self.properties().ranking()
    }

    /// 排序键：排名降序，再按服务 ID 升序
    ///
    /// 排名读取的是当前属性快照，并发修改属性时应先取键再排序。
    pub fn sort_key(&self) -> (Reverse<i64>, ServiceId) {
        (Reverse(self.ranking()), self.inner.id)
    }

    pub fn is_registered(&self) -> bool {
        self.registration().is_available()
    }

    pub fn is_factory(&self) -> bool {
        self.inner.source.is_factory()
    }

    pub(crate) fn registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.inner.id)
            .field("types", &self.inner.types)
            .finish()
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// 每次比较都会重新读取排名；对集合排序请使用 `sort_references`
impl Ord for ServiceReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// 按排名排序引用，每个元素只读取一次属性快照
pub fn sort_references(references: &mut [ServiceReference]) {
    references.sort_by_cached_key(ServiceReference::sort_key);
}
