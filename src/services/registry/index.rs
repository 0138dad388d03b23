use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::registration::{ServiceReference, ServiceRegistration, sort_references};
use super::types::{ModuleId, ServiceId};
use crate::services::hooks::HookKind;

/// 类型索引、所有者索引和钩子视图，整体由一把读写锁保护
#[derive(Default)]
pub(crate) struct ServiceIndex {
    by_id: BTreeMap<ServiceId, ServiceRegistration>,
    /// 类型名 -> 注册
    by_type: HashMap<String, BTreeMap<ServiceId, ServiceReference>>,
    by_owner: HashMap<ModuleId, BTreeSet<ServiceId>>,
    event_hooks: BTreeMap<ServiceId, ServiceReference>,
    find_hooks: BTreeMap<ServiceId, ServiceReference>,
    listener_hooks: BTreeMap<ServiceId, ServiceReference>,
}

impl ServiceIndex {
    fn hook_view_mut(&mut self, kind: HookKind) -> &mut BTreeMap<ServiceId, ServiceReference> {
        match kind {
            HookKind::Event => &mut self.event_hooks,
            HookKind::Find => &mut self.find_hooks,
            HookKind::Listener => &mut self.listener_hooks,
        }
    }

    fn hook_view(&self, kind: HookKind) -> &BTreeMap<ServiceId, ServiceReference> {
        match kind {
            HookKind::Event => &self.event_hooks,
            HookKind::Find => &self.find_hooks,
            HookKind::Listener => &self.listener_hooks,
        }
    }

    pub(crate) fn insert(&mut self, registration: &ServiceRegistration) {
        let id = registration.id();
        let reference = registration.reference();

        self.by_id.insert(id, registration.clone());
        for type_name in registration.types() {
            self.by_type
                .entry(type_name.clone())
                .or_default()
                .insert(id, reference.clone());
        }
        self.by_owner
            .entry(registration.owner())
            .or_default()
            .insert(id);
        for kind in registration.hook_kinds() {
            self.hook_view_mut(*kind).insert(id, reference.clone());
        }
    }

    pub(crate) fn remove(&mut self, registration: &ServiceRegistration) -> bool {
        let id = registration.id();
        if self.by_id.remove(&id).is_none() {
            return false;
        }

        for type_name in registration.types() {
            if let Some(entries) = self.by_type.get_mut(type_name) {
                entries.remove(&id);
                if entries.is_empty() {
                    self.by_type.remove(type_name);
                }
            }
        }
        if let Some(owned) = self.by_owner.get_mut(&registration.owner()) {
            owned.remove(&id);
            if owned.is_empty() {
                self.by_owner.remove(&registration.owner());
            }
        }
        for kind in registration.hook_kinds() {
            self.hook_view_mut(*kind).remove(&id);
        }
        true
    }

    /// 候选集合，`None` 表示全量扫描
    pub(crate) fn candidates(&self, type_name: Option<&str>) -> Vec<ServiceReference> {
        match type_name {
            Some(type_name) => self
                .by_type
                .get(type_name)
                .map(|entries| entries.values().cloned().collect())
                .unwrap_or_default(),
            None => self
                .by_id
                .values()
                .map(ServiceRegistration::reference)
                .collect(),
        }
    }

    /// 按排名排序的钩子视图
    pub(crate) fn hooks(&self, kind: HookKind) -> Vec<ServiceReference> {
        let mut hooks: Vec<ServiceReference> = self.hook_view(kind).values().cloned().collect();
        sort_references(&mut hooks);
        hooks
    }

    pub(crate) fn owned_by(&self, owner: ModuleId) -> Vec<ServiceRegistration> {
        self.by_owner
            .get(&owner)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn registrations(&self) -> Vec<ServiceRegistration> {
        self.by_id.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}
