use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::types::{
    EventConfig, EventStats, ListenerId, ServiceEvent, ServiceEventKind, ServiceListener,
};
use crate::services::error::{RegistryError, Result, guarded};
use crate::services::filter::Filter;
use crate::services::hooks::ListenerInfo;
use crate::services::registry::properties::Properties;
use crate::services::registry::types::ModuleId;

/// 监听器表中的一项
pub(crate) struct ListenerEntry {
    pub(crate) id: ListenerId,
    pub(crate) consumer: ModuleId,
    pub(crate) filter: Option<Filter>,
    listener: Arc<dyn ServiceListener>,
}

impl ListenerEntry {
    pub(crate) fn info(&self, removed: bool) -> ListenerInfo {
        ListenerInfo {
            listener_id: self.id,
            consumer: self.consumer,
            filter: self.filter.as_ref().map(Filter::to_string),
            removed,
        }
    }

    fn matches(&self, properties: &Properties) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.matches(properties))
    }
}

/// 监听器表和同步事件投递
pub(crate) struct EventBus {
    /// 监听器ID -> 监听器，按注册顺序投递
    listeners: RwLock<BTreeMap<ListenerId, Arc<ListenerEntry>>>,
    next_listener_id: AtomicU64,
    /// 事件统计
    stats: Arc<Mutex<EventStats>>,
    /// 配置
    config: EventConfig,
}

impl EventBus {
    pub(crate) fn new(config: EventConfig) -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(1),
            stats: Arc::new(Mutex::new(EventStats::default())),
            config,
        }
    }

    pub(crate) fn config(&self) -> &EventConfig {
        &self.config
    }

    pub(crate) fn add(
        &self,
        consumer: ModuleId,
        filter: Option<Filter>,
        listener: Arc<dyn ServiceListener>,
        max_listeners: usize,
    ) -> Result<Arc<ListenerEntry>> {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners.len() >= max_listeners {
            return Err(RegistryError::ListenerLimitExceeded {
                limit: max_listeners,
            });
        }

        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(ListenerEntry {
            id,
            consumer,
            filter,
            listener,
        });
        listeners.insert(id, entry.clone());

        tracing::debug!(
            listener_id = %id,
            consumer = %consumer,
            filter = ?entry.filter.as_ref().map(Filter::to_string),
            "Service listener added"
        );
        Ok(entry)
    }

    pub(crate) fn remove(&self, consumer: ModuleId, id: ListenerId) -> Option<Arc<ListenerEntry>> {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // 只能移除自己的监听器
        if listeners.get(&id)?.consumer != consumer {
            return None;
        }
        let removed = listeners.remove(&id);
        tracing::debug!(listener_id = %id, consumer = %consumer, "Service listener removed");
        removed
    }

    pub(crate) fn remove_consumer(&self, consumer: ModuleId) -> Vec<Arc<ListenerEntry>> {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<ListenerId> = listeners
            .values()
            .filter(|entry| entry.consumer == consumer)
            .map(|entry| entry.id)
            .collect();
        ids.iter().filter_map(|id| listeners.remove(id)).collect()
    }

    pub(crate) fn clear(&self) -> Vec<Arc<ListenerEntry>> {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *listeners).into_values().collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<ListenerEntry>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 计算事件的接收者及各自收到的事件类型
    pub(crate) fn matching(
        &self,
        event: &ServiceEvent,
        previous: Option<&Properties>,
    ) -> Vec<(Arc<ListenerEntry>, ServiceEventKind)> {
        let properties = event.reference.properties();
        self.snapshot()
            .into_iter()
            .filter_map(|entry| {
                if entry.matches(&properties) {
                    Some((entry, event.kind))
                } else if event.kind == ServiceEventKind::Modified
                    && previous.is_some_and(|old| entry.matches(old))
                {
                    Some((entry, ServiceEventKind::ModifiedEndMatch))
                } else {
                    None
                }
            })
            .collect()
    }

    /// 投递给 consumer 仍在 `contexts` 中的监听器，返回成功投递数
    pub(crate) fn deliver(
        &self,
        event: &ServiceEvent,
        targets: Vec<(Arc<ListenerEntry>, ServiceEventKind)>,
        contexts: &[ModuleId],
    ) -> usize {
        let mut delivered = 0;
        let mut failures = 0;

        for (entry, kind) in targets {
            if !contexts.contains(&entry.consumer) {
                continue;
            }
            let event = ServiceEvent::new(kind, event.reference.clone());
            match guarded(|| entry.listener.try_service_changed(&event)) {
                Ok(true) => delivered += 1,
                Ok(false) => failures += 1,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        listener_id = %entry.id,
                        consumer = %entry.consumer,
                        service_id = event.reference.id(),
                        error = %e,
                        "Service listener panicked during event delivery"
                    );
                }
            }
        }

        if self.config.enable_metrics {
            if let Ok(mut stats) = self.stats.lock() {
                stats.events_published += 1;
                stats.events_delivered += delivered as u64;
                stats.delivery_failures += failures;
            }
        }

        tracing::debug!(
            kind = ?event.kind,
            service_id = event.reference.id(),
            delivered = delivered,
            "Delivered service event"
        );
        delivered
    }

    /// 获取事件统计信息
    pub(crate) fn get_stats(&self) -> EventStats {
        let base_stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        EventStats {
            active_listeners: self.len(),
            ..base_stats
        }
    }
}
