//! Service hooks
//!
//! Hooks are ordinary services registered under one of the hook type names.
//! - `types`: hook traits and the shrink-only collection handed to them
//! - `dispatch`: invoking the hook chains from the registry

pub mod dispatch;
pub mod types;

pub use types::{
    EVENT_HOOK, EventHook, FIND_HOOK, FindHook, HookKind, LISTENER_HOOK, ListenerHook,
    ListenerInfo, ShrinkableCollection,
};
