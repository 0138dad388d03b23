use crate::services::error::HookError;
use crate::services::event::{ListenerId, ServiceEvent};
use crate::services::filter::Filter;
use crate::services::registry::registration::ServiceReference;
use crate::services::registry::types::ModuleId;

// 钩子服务的类型名
pub const EVENT_HOOK: &str = "EventHook";
pub const FIND_HOOK: &str = "FindHook";
pub const LISTENER_HOOK: &str = "ListenerHook";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Event,
    Find,
    Listener,
}

impl HookKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            EVENT_HOOK => Some(HookKind::Event),
            FIND_HOOK => Some(HookKind::Find),
            LISTENER_HOOK => Some(HookKind::Listener),
            _ => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            HookKind::Event => EVENT_HOOK,
            HookKind::Find => FIND_HOOK,
            HookKind::Listener => LISTENER_HOOK,
        }
    }
}

/// 只允许删除、不允许添加的集合
#[derive(Debug, Clone)]
pub struct ShrinkableCollection<T> {
    items: Vec<T>,
}

impl<T: PartialEq> ShrinkableCollection<T> {
    pub(crate) fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn remove(&mut self, item: &T) -> bool {
        let before = self.items.len();
        self.items.retain(|existing| existing != item);
        self.items.len() != before
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub(crate) fn into_inner(self) -> Vec<T> {
        self.items
    }
}

/// 传递给 ListenerHook 的监听器描述
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerInfo {
    pub listener_id: ListenerId,
    pub consumer: ModuleId,
    pub filter: Option<String>,
    pub removed: bool,
}

/// 在事件投递前缩减接收者集合
pub trait EventHook: Send + Sync {
    fn event(
        &self,
        event: &ServiceEvent,
        contexts: &mut ShrinkableCollection<ModuleId>,
    ) -> Result<(), HookError>;
}

/// 在查找结果返回前缩减候选引用
pub trait FindHook: Send + Sync {
    fn find(
        &self,
        requester: ModuleId,
        type_name: Option<&str>,
        filter: Option<&Filter>,
        references: &mut ShrinkableCollection<ServiceReference>,
    ) -> Result<(), HookError>;
}

/// 观察监听器表的变化
pub trait ListenerHook: Send + Sync {
    fn added(&self, listeners: &[ListenerInfo]) -> Result<(), HookError>;

    fn removed(&self, listeners: &[ListenerInfo]) -> Result<(), HookError>;
}
