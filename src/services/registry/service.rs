use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::index::ServiceIndex;
use super::properties::Properties;
use super::registration::{ServiceReference, ServiceRegistration, sort_references};
use super::types::{ANY_TYPE, ModuleId, RegistryConfig, ServiceObject, ServiceSource};
use super::usage::UsageTable;
use crate::config::Config;
use crate::services::error::{HookError, RegistryError, Result, guarded};
use crate::services::event::event_bus::EventBus;
use crate::services::event::stream::ChannelListener;
use crate::services::event::{
    EventConfig, EventStats, ListenerId, ServiceEvent, ServiceEventKind, ServiceEventStream,
    ServiceListener,
};
use crate::services::filter::Filter;
use crate::services::hooks::HookKind;

pub(crate) struct RegistryInner {
    pub(crate) config: RegistryConfig,
    next_service_id: AtomicU64,
    /// 类型索引、所有者索引和钩子视图
    index: RwLock<ServiceIndex>,
    /// (服务, 消费者) -> 服务对象和引用计数
    usages: UsageTable,
    pub(crate) events: EventBus,
    shut_down: AtomicBool,
}

/// 服务注册表，克隆后共享同一个实例
#[derive(Clone)]
pub struct ServiceRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig, event_config: EventConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                next_service_id: AtomicU64::new(1),
                index: RwLock::new(ServiceIndex::default()),
                usages: UsageTable::new(),
                events: EventBus::new(event_config),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.registry.clone(), config.events.clone())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn read_index(&self) -> RwLockReadGuard<'_, ServiceIndex> {
        self.inner
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, ServiceIndex> {
        self.inner
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(RegistryError::Shutdown);
        }
        Ok(())
    }

    pub(crate) fn hooks_enabled(&self) -> bool {
        self.inner.config.enable_hooks
    }

    // 注册服务
    pub fn register_service<I, S>(
        &self,
        owner: ModuleId,
        types: I,
        service: impl Into<ServiceSource>,
        properties: Properties,
    ) -> Result<ServiceRegistration>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut type_names: Vec<String> = Vec::new();
        for name in types.into_iter().map(Into::into) {
            if name.is_empty() {
                return Err(RegistryError::InvalidArgument(
                    "service type names must not be empty".to_string(),
                ));
            }
            if !type_names.contains(&name) {
                type_names.push(name);
            }
        }
        if type_names.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "at least one service type is required".to_string(),
            ));
        }

        let id = self.inner.next_service_id.fetch_add(1, Ordering::Relaxed);
        let registration =
            ServiceRegistration::new(id, owner, type_names, service.into(), properties);

        {
            let mut index = self.write_index();
            if self.is_shut_down() {
                return Err(RegistryError::Shutdown);
            }
            index.insert(&registration);
        }

        tracing::info!(
            service_id = id,
            owner = %owner,
            types = ?registration.types(),
            factory = registration.is_factory(),
            "Registered service"
        );

        let reference = registration.reference();
        if self.hooks_enabled() && registration.has_hook(HookKind::Listener) {
            self.replay_listeners(&reference);
        }
        self.fire(ServiceEvent::new(ServiceEventKind::Registered, reference), None);

        Ok(registration)
    }

    // 注销服务，只有注册方可以注销
    pub fn unregister_service(
        &self,
        owner: ModuleId,
        registration: &ServiceRegistration,
    ) -> Result<()> {
        self.ensure_active()?;
        if registration.owner() != owner {
            return Err(RegistryError::InvalidRegistration {
                service_id: registration.id(),
                reason: "registration belongs to another module",
            });
        }
        if !registration.begin_unregister() {
            return Err(RegistryError::InvalidRegistration {
                service_id: registration.id(),
                reason: "service is not registered",
            });
        }
        self.complete_unregister(registration);
        Ok(())
    }

    // 调用方已经完成 Registered -> Unregistering 的转换
    fn complete_unregister(&self, registration: &ServiceRegistration) {
        self.fire(
            ServiceEvent::new(ServiceEventKind::Unregistering, registration.reference()),
            None,
        );

        {
            let mut index = self.write_index();
            index.remove(registration);
            registration.mark_unregistered();
        }

        let released = self.inner.usages.release_service(registration.id());
        tracing::info!(
            service_id = registration.id(),
            owner = %registration.owner(),
            released_usages = released,
            "Unregistered service"
        );
    }

    // 替换服务属性并触发 MODIFIED
    pub fn set_properties(
        &self,
        registration: &ServiceRegistration,
        properties: Properties,
    ) -> Result<()> {
        self.ensure_active()?;
        let Some(previous) = registration.replace_properties(properties) else {
            return Err(RegistryError::InvalidRegistration {
                service_id: registration.id(),
                reason: "service is not registered",
            });
        };
        tracing::debug!(service_id = registration.id(), "Service properties modified");

        // 注销已经开始时不再发送 MODIFIED，UNREGISTERING 携带的已是新属性
        if !registration.is_registered() {
            return Ok(());
        }
        self.fire(
            ServiceEvent::new(ServiceEventKind::Modified, registration.reference()),
            Some(&previous),
        );
        Ok(())
    }

    /// 按类型和过滤器查找，结果经过 FindHook 缩减后按排名排序
    ///
    /// `type_name` 为 `None` 或 `"*"` 时扫描全部注册。
    pub fn get_service_references(
        &self,
        requester: ModuleId,
        type_name: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>> {
        self.ensure_active()?;
        let filter = filter.map(Filter::parse).transpose()?;
        let type_name = type_name.filter(|name| *name != ANY_TYPE);

        let candidates = self.read_index().candidates(type_name);
        let mut references: Vec<ServiceReference> = candidates
            .into_iter()
            .filter(|reference| {
                filter
                    .as_ref()
                    .is_none_or(|filter| filter.matches(&reference.properties()))
            })
            .collect();

        if self.hooks_enabled() {
            references = self.run_find_hooks(requester, type_name, filter.as_ref(), references);
        }
        sort_references(&mut references);

        tracing::debug!(
            requester = %requester,
            type_name = type_name.unwrap_or(ANY_TYPE),
            filter = ?filter.as_ref().map(Filter::to_string),
            found = references.len(),
            "Service lookup completed"
        );
        Ok(references)
    }

    // 排名最高的可见引用
    pub fn get_service_reference(
        &self,
        requester: ModuleId,
        type_name: &str,
    ) -> Result<Option<ServiceReference>> {
        let references = self.get_service_references(requester, Some(type_name), None)?;
        Ok(references.into_iter().next())
    }

    pub fn get_service(
        &self,
        requester: ModuleId,
        reference: &ServiceReference,
    ) -> Option<ServiceObject> {
        if self.is_shut_down() {
            return None;
        }
        self.inner.usages.acquire(&reference.registration(), requester)
    }

    pub fn unget_service(&self, requester: ModuleId, reference: &ServiceReference) -> bool {
        if self.is_shut_down() {
            return false;
        }
        self.inner.usages.release(&reference.registration(), requester)
    }

    /// 获取服务、执行回调、释放服务；回调失败或 panic 时同样释放
    pub fn invoke_hook<R>(
        &self,
        reference: &ServiceReference,
        caller: ModuleId,
        callback: impl FnOnce(&ServiceObject) -> std::result::Result<R, HookError>,
    ) -> Option<R> {
        let service = self.get_service(caller, reference)?;
        let result = guarded(|| callback(&service))
            .map_err(HookError::Panicked)
            .and_then(|result| result);
        self.unget_service(caller, reference);

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    service_id = reference.id(),
                    caller = %caller,
                    error = %e,
                    "Hook invocation failed"
                );
                None
            }
        }
    }

    pub fn get_event_hooks(&self) -> Vec<ServiceReference> {
        self.read_index().hooks(HookKind::Event)
    }

    pub fn get_find_hooks(&self) -> Vec<ServiceReference> {
        self.read_index().hooks(HookKind::Find)
    }

    pub fn get_listener_hooks(&self) -> Vec<ServiceReference> {
        self.read_index().hooks(HookKind::Listener)
    }

    // 添加服务监听器，随后通知所有 ListenerHook
    pub fn add_service_listener<L>(
        &self,
        consumer: ModuleId,
        filter: Option<&str>,
        listener: L,
    ) -> Result<ListenerId>
    where
        L: ServiceListener + 'static,
    {
        self.ensure_active()?;
        let filter = filter.map(Filter::parse).transpose()?;
        let entry = self.inner.events.add(
            consumer,
            filter,
            Arc::new(listener),
            self.inner.config.max_listeners,
        )?;
        self.notify_listener_hooks(&[entry.info(false)], true);
        Ok(entry.id)
    }

    pub fn remove_service_listener(&self, consumer: ModuleId, listener_id: ListenerId) -> bool {
        match self.inner.events.remove(consumer, listener_id) {
            Some(entry) => {
                self.notify_listener_hooks(&[entry.info(true)], false);
                true
            }
            None => false,
        }
    }

    // 移除某个模块的全部监听器
    pub fn remove_all_listeners(&self, consumer: ModuleId) -> usize {
        let removed = self.inner.events.remove_consumer(consumer);
        if !removed.is_empty() {
            let infos: Vec<_> = removed.iter().map(|entry| entry.info(true)).collect();
            self.notify_listener_hooks(&infos, false);
        }
        removed.len()
    }

    /// 订阅服务事件流
    pub fn subscribe(
        &self,
        consumer: ModuleId,
        filter: Option<&str>,
    ) -> Result<ServiceEventStream> {
        self.ensure_active()?;
        let filter = filter.map(Filter::parse).transpose()?;
        let events = &self.inner.events;
        let (listener, receiver) = ChannelListener::channel(events.config().stream_capacity);
        let subscriber_id = listener.subscriber_id();

        let entry = events.add(
            consumer,
            filter,
            Arc::new(listener),
            self.inner.config.max_listeners,
        )?;
        self.notify_listener_hooks(&[entry.info(false)], true);

        tracing::info!(
            subscriber_id = %subscriber_id,
            listener_id = %entry.id,
            consumer = %consumer,
            "Subscribed to service events"
        );
        Ok(ServiceEventStream::new(
            subscriber_id,
            entry.id,
            consumer,
            receiver,
        ))
    }

    pub fn unsubscribe(&self, stream: &ServiceEventStream) -> bool {
        let removed = self.remove_service_listener(stream.consumer(), stream.listener_id());
        if removed {
            tracing::info!(
                subscriber_id = %stream.subscriber_id(),
                "Unsubscribed from service events"
            );
        }
        removed
    }

    /// 获取事件统计信息
    pub fn event_stats(&self) -> EventStats {
        self.inner.events.get_stats()
    }

    // 某个模块注册的全部服务
    pub fn get_registered_services(&self, owner: ModuleId) -> Vec<ServiceReference> {
        let mut references: Vec<ServiceReference> = self
            .read_index()
            .owned_by(owner)
            .iter()
            .map(ServiceRegistration::reference)
            .collect();
        sort_references(&mut references);
        references
    }

    // 注销某个模块注册的全部服务，返回注销数量
    pub fn unregister_services(&self, owner: ModuleId) -> Result<usize> {
        self.ensure_active()?;
        let registrations = self.read_index().owned_by(owner);
        let mut count = 0;
        for registration in registrations.iter().rev() {
            if registration.begin_unregister() {
                self.complete_unregister(registration);
                count += 1;
            }
        }
        Ok(count)
    }

    // 某个模块正在使用的服务
    pub fn get_services_in_use(&self, consumer: ModuleId) -> Vec<ServiceReference> {
        self.inner
            .usages
            .used_by(consumer)
            .iter()
            .map(ServiceRegistration::reference)
            .collect()
    }

    // 正在使用该服务的模块
    pub fn get_using_modules(&self, reference: &ServiceReference) -> Vec<ModuleId> {
        self.inner.usages.consumers_of(reference.id())
    }

    pub fn usage_count(&self, consumer: ModuleId, reference: &ServiceReference) -> usize {
        self.inner.usages.count(reference.id(), consumer)
    }

    // 释放某个模块持有的全部服务
    pub fn unget_services(&self, consumer: ModuleId) -> usize {
        let released = self.inner.usages.release_consumer(consumer);
        if released > 0 {
            tracing::debug!(consumer = %consumer, released = released, "Released service usages");
        }
        released
    }

    /// 关闭注册表：注销全部服务并清空监听器表，可重复调用
    pub fn shutdown(&self) {
        {
            let _index = self.write_index();
            if self.inner.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
        }

        let registrations = self.read_index().registrations();
        let mut unregistered = 0;
        for registration in registrations.iter().rev() {
            if registration.begin_unregister() {
                self.complete_unregister(registration);
                unregistered += 1;
            }
        }
        let listeners = self.inner.events.clear();
        let released = self.inner.usages.release_all();

        tracing::info!(
            unregistered = unregistered,
            listeners_removed = listeners.len(),
            released_usages = released,
            "Service registry shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // 计算接收者，经过 EventHook 缩减后同步投递
    fn fire(&self, event: ServiceEvent, previous: Option<&Properties>) {
        let targets = self.inner.events.matching(&event, previous);

        let mut contexts: Vec<ModuleId> = targets.iter().map(|(entry, _)| entry.consumer).collect();
        contexts.sort();
        contexts.dedup();
        if self.hooks_enabled() && !contexts.is_empty() {
            contexts = self.run_event_hooks(&event, contexts);
        }

        self.inner.events.deliver(&event, targets, &contexts);
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default(), EventConfig::default())
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("config", &self.inner.config)
            .field("services", &self.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
