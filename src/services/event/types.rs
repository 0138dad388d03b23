use std::fmt;

use serde::{Deserialize, Serialize};

use crate::services::registry::registration::ServiceReference;

/// 服务事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    /// 属性修改后不再匹配监听器的过滤器
    ModifiedEndMatch,
    Unregistering,
}

/// 服务事件
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceReference,
}

impl ServiceEvent {
    pub fn new(kind: ServiceEventKind, reference: ServiceReference) -> Self {
        Self { kind, reference }
    }
}

/// 监听器标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// 服务事件监听器，在触发事件的线程上同步调用
pub trait ServiceListener: Send + Sync {
    fn service_changed(&self, event: &ServiceEvent);

    /// 投递事件，返回 false 表示事件被丢弃并计入投递失败
    fn try_service_changed(&self, event: &ServiceEvent) -> bool {
        self.service_changed(event);
        true
    }
}

impl<F> ServiceListener for F
where
    F: Fn(&ServiceEvent) + Send + Sync,
{
    fn service_changed(&self, event: &ServiceEvent) {
        self(event)
    }
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// 每个事件流的通道容量
    pub stream_capacity: usize,
    /// 是否启用事件统计
    pub enable_metrics: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 1024,
            enable_metrics: true,
        }
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 已触发的事件总数
    pub events_published: u64,
    /// 已投递给监听器的事件总数
    pub events_delivered: u64,
    /// 失败的投递数量
    pub delivery_failures: u64,
    /// 当前监听器数量
    pub active_listeners: usize,
}
