use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::registration::ServiceRegistration;
use super::types::{ModuleId, ServiceId, ServiceObject};
use crate::services::error::FactoryError;

type UsageKey = (ServiceId, ModuleId);

enum SlotState {
    // 工厂正在为该消费者创建对象
    Pending(ThreadId),
    Ready { service: ServiceObject, count: usize },
    Released,
}

struct UsageSlot {
    registration: ServiceRegistration,
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl UsageSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 每个 (注册, 消费者) 的服务对象缓存和引用计数
///
/// 槽位锁内从不调用用户代码；锁顺序为 槽位 -> 分片，
/// 持有分片锁时从不获取槽位锁。
pub(crate) struct UsageTable {
    slots: DashMap<UsageKey, Arc<UsageSlot>>,
}

impl UsageTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// 获取服务对象；工厂对每个使用周期只调用一次 `get_service`
    pub(crate) fn acquire(
        &self,
        registration: &ServiceRegistration,
        consumer: ModuleId,
    ) -> Option<ServiceObject> {
        let key = (registration.id(), consumer);
        loop {
            if !registration.is_available() {
                return None;
            }

            let (slot, created) = match self.slots.entry(key) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => {
                    let slot = Arc::new(UsageSlot {
                        registration: registration.clone(),
                        state: Mutex::new(SlotState::Pending(thread::current().id())),
                        ready: Condvar::new(),
                    });
                    entry.insert(slot.clone());
                    (slot, true)
                }
            };

            if created {
                return self.create(&slot, key);
            }

            let mut state = slot.lock();
            loop {
                match &mut *state {
                    SlotState::Ready { service, count } => {
                        *count += 1;
                        tracing::debug!(
                            service_id = key.0,
                            consumer = %consumer,
                            count = *count,
                            "Service usage incremented"
                        );
                        return Some(service.clone());
                    }
                    // 槽位已经从表中移除，重新开始
                    SlotState::Released => break,
                    SlotState::Pending(creator) => {
                        if *creator == thread::current().id() {
                            let e = FactoryError::Recursion {
                                service_id: key.0,
                                consumer,
                            };
                            tracing::warn!(error = %e, "Rejected recursive service request");
                            return None;
                        }
                    }
                }
                state = slot
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    fn create(&self, slot: &Arc<UsageSlot>, key: UsageKey) -> Option<ServiceObject> {
        let (service_id, consumer) = key;
        let registration = &slot.registration;

        let service = match registration.produce(consumer) {
            Ok(service) => service,
            Err(e) => {
                tracing::warn!(
                    service_id = service_id,
                    consumer = %consumer,
                    error = %e,
                    "Service factory failed to produce service object"
                );
                self.abandon(slot, key, slot.lock());
                return None;
            }
        };

        let mut state = slot.lock();
        // 在槽位锁内检查，注销方的释放必然在此之后看到 Ready
        if !registration.is_available() {
            self.abandon(slot, key, state);
            registration.dispose(consumer, service);
            return None;
        }
        *state = SlotState::Ready {
            service: service.clone(),
            count: 1,
        };
        slot.ready.notify_all();
        drop(state);

        tracing::debug!(
            service_id = service_id,
            consumer = %consumer,
            factory = registration.is_factory(),
            "Service usage created"
        );
        Some(service)
    }

    fn abandon(&self, slot: &Arc<UsageSlot>, key: UsageKey, mut state: MutexGuard<'_, SlotState>) {
        *state = SlotState::Released;
        self.slots
            .remove_if(&key, |_, existing| Arc::ptr_eq(existing, slot));
        slot.ready.notify_all();
    }

    /// 引用计数减一；降到零时释放对象。没有对应使用记录时返回 false
    pub(crate) fn release(&self, registration: &ServiceRegistration, consumer: ModuleId) -> bool {
        let key = (registration.id(), consumer);
        let Some(slot) = self.slots.get(&key).map(|entry| entry.value().clone()) else {
            tracing::debug!(
                service_id = key.0,
                consumer = %consumer,
                "Ignoring unget without matching usage"
            );
            return false;
        };

        let service = {
            let mut state = slot.lock();
            match &mut *state {
                SlotState::Ready { count, .. } if *count > 1 => {
                    *count -= 1;
                    return true;
                }
                SlotState::Ready { .. } => {}
                SlotState::Pending(_) | SlotState::Released => return false,
            }
            let SlotState::Ready { service, .. } =
                std::mem::replace(&mut *state, SlotState::Released)
            else {
                return false;
            };
            self.slots
                .remove_if(&key, |_, existing| Arc::ptr_eq(existing, &slot));
            slot.ready.notify_all();
            service
        };

        slot.registration.dispose(consumer, service);
        tracing::debug!(service_id = key.0, consumer = %consumer, "Service usage released");
        true
    }

    /// 注销时释放该服务的全部使用记录
    pub(crate) fn release_service(&self, service_id: ServiceId) -> usize {
        let slots = self.collect(|(id, _)| *id == service_id);
        self.drain(slots)
    }

    /// 释放某个消费者持有的全部使用记录
    pub(crate) fn release_consumer(&self, consumer: ModuleId) -> usize {
        let slots = self.collect(|(_, module)| *module == consumer);
        self.drain(slots)
    }

    pub(crate) fn release_all(&self) -> usize {
        let slots = self.collect(|_| true);
        self.drain(slots)
    }

    fn drain(&self, slots: Vec<(UsageKey, Arc<UsageSlot>)>) -> usize {
        let mut released = Vec::new();
        for (key, slot) in slots {
            let mut state = slot.lock();
            if !matches!(*state, SlotState::Ready { .. }) {
                // Pending 的创建方会发现注册已失效并自行回收
                continue;
            }
            let previous = std::mem::replace(&mut *state, SlotState::Released);
            self.slots
                .remove_if(&key, |_, existing| Arc::ptr_eq(existing, &slot));
            slot.ready.notify_all();
            drop(state);
            if let SlotState::Ready { service, .. } = previous {
                released.push((key, slot.registration.clone(), service));
            }
        }

        let count = released.len();
        for ((_, consumer), registration, service) in released {
            registration.dispose(consumer, service);
        }
        count
    }

    // 先收集再加槽位锁，避免持有分片锁时获取槽位锁
    fn collect(&self, select: impl Fn(&UsageKey) -> bool) -> Vec<(UsageKey, Arc<UsageSlot>)> {
        self.slots
            .iter()
            .filter(|entry| select(entry.key()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    fn ready_count(slot: &UsageSlot) -> usize {
        match &*slot.lock() {
            SlotState::Ready { count, .. } => *count,
            _ => 0,
        }
    }

    pub(crate) fn count(&self, service_id: ServiceId, consumer: ModuleId) -> usize {
        let Some(slot) = self
            .slots
            .get(&(service_id, consumer))
            .map(|entry| entry.value().clone())
        else {
            return 0;
        };
        Self::ready_count(&slot)
    }

    pub(crate) fn consumers_of(&self, service_id: ServiceId) -> Vec<ModuleId> {
        let mut consumers: Vec<ModuleId> = self
            .collect(|(id, _)| *id == service_id)
            .into_iter()
            .filter(|(_, slot)| Self::ready_count(slot) > 0)
            .map(|((_, consumer), _)| consumer)
            .collect();
        consumers.sort();
        consumers
    }

    pub(crate) fn used_by(&self, consumer: ModuleId) -> Vec<ServiceRegistration> {
        let mut registrations: Vec<ServiceRegistration> = self
            .collect(|(_, module)| *module == consumer)
            .into_iter()
            .filter(|(_, slot)| Self::ready_count(slot) > 0)
            .map(|(_, slot)| slot.registration.clone())
            .collect();
        registrations.sort_by_key(ServiceRegistration::id);
        registrations
    }
}
