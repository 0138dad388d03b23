use super::types::{EVENT_HOOK, FIND_HOOK, LISTENER_HOOK, ListenerInfo, ShrinkableCollection};
use crate::services::error::HookError;
use crate::services::event::ServiceEvent;
use crate::services::filter::Filter;
use crate::services::registry::registration::ServiceReference;
use crate::services::registry::service::ServiceRegistry;
use crate::services::registry::types::ModuleId;

// 钩子对象始终以注册表自身的身份获取
impl ServiceRegistry {
    // 依排名顺序调用 FindHook，只允许删除候选
    pub(crate) fn run_find_hooks(
        &self,
        requester: ModuleId,
        type_name: Option<&str>,
        filter: Option<&Filter>,
        references: Vec<ServiceReference>,
    ) -> Vec<ServiceReference> {
        let hooks = self.get_find_hooks();
        if hooks.is_empty() || references.is_empty() {
            return references;
        }

        let mut collection = ShrinkableCollection::new(references);
        for hook in &hooks {
            let before = collection.len();
            self.invoke_hook(hook, ModuleId::SYSTEM, |service| {
                let find_hook = service.as_find_hook().ok_or(HookError::NotImplemented {
                    service_id: hook.id(),
                    hook: FIND_HOOK,
                })?;
                find_hook.find(requester, type_name, filter, &mut collection)
            });
            if collection.len() != before {
                tracing::debug!(
                    hook_id = hook.id(),
                    requester = %requester,
                    removed = before - collection.len(),
                    "FindHook removed service references"
                );
            }
        }
        collection.into_inner()
    }

    // 依排名顺序调用 EventHook，返回剩余的接收模块
    pub(crate) fn run_event_hooks(
        &self,
        event: &ServiceEvent,
        contexts: Vec<ModuleId>,
    ) -> Vec<ModuleId> {
        let hooks = self.get_event_hooks();
        if hooks.is_empty() {
            return contexts;
        }

        let mut collection = ShrinkableCollection::new(contexts);
        for hook in &hooks {
            if collection.is_empty() {
                break;
            }
            self.invoke_hook(hook, ModuleId::SYSTEM, |service| {
                let event_hook = service.as_event_hook().ok_or(HookError::NotImplemented {
                    service_id: hook.id(),
                    hook: EVENT_HOOK,
                })?;
                event_hook.event(event, &mut collection)
            });
        }
        collection.into_inner()
    }

    // 将监听器表的增量通知给所有 ListenerHook
    pub(crate) fn notify_listener_hooks(&self, listeners: &[ListenerInfo], added: bool) {
        if !self.hooks_enabled() || listeners.is_empty() {
            return;
        }
        for hook in &self.get_listener_hooks() {
            self.call_listener_hook(hook, listeners, added);
        }
    }

    // 新注册的 ListenerHook 先收到完整的监听器表
    pub(crate) fn replay_listeners(&self, hook: &ServiceReference) {
        let listeners: Vec<ListenerInfo> = self
            .inner
            .events
            .snapshot()
            .iter()
            .map(|entry| entry.info(false))
            .collect();
        if listeners.is_empty() {
            return;
        }

        tracing::debug!(
            hook_id = hook.id(),
            listeners = listeners.len(),
            "Replaying listener table to new ListenerHook"
        );
        self.call_listener_hook(hook, &listeners, true);
    }

    fn call_listener_hook(&self, hook: &ServiceReference, listeners: &[ListenerInfo], added: bool) {
        self.invoke_hook(hook, ModuleId::SYSTEM, |service| {
            let listener_hook = service.as_listener_hook().ok_or(HookError::NotImplemented {
                service_id: hook.id(),
                hook: LISTENER_HOOK,
            })?;
            if added {
                listener_hook.added(listeners)
            } else {
                listener_hook.removed(listeners)
            }
        });
    }
}
