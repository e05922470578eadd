//! 事件模組
//!
//! 具名處理器掛在事件字串上（例如 `core.prompt`），由核心在
//! 對應時機點燃。目前的事件來源都是原生程式碼（插件層）。

use std::collections::HashMap;
use std::sync::Arc;

use crate::session::Session;

/// 事件附帶資料（預留擴充）
#[derive(Debug, Clone, Default)]
pub struct EventData {}

/// 事件處理器
pub type EventFn = Arc<dyn Fn(&Arc<Session>, &EventData) + Send + Sync>;

/// 事件掛鉤
#[derive(Clone)]
pub struct Event {
    pub name: String,
    /// 監聽的事件字串
    pub event: String,
    pub enabled: bool,
    pub count: u64,
    pub handler: EventFn,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("event", &self.event)
            .field("enabled", &self.enabled)
            .field("count", &self.count)
            .finish()
    }
}

impl Event {
    pub fn new(name: impl Into<String>, event: impl Into<String>, handler: EventFn) -> Self {
        Self {
            name: name.into(),
            event: event.into(),
            enabled: true,
            count: 0,
            handler,
        }
    }
}

/// 事件註冊表
#[derive(Debug, Default)]
pub struct EventManager {
    events: HashMap<String, Event>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: Event) {
        self.events.insert(event.name.clone(), event);
    }

    pub fn remove(&mut self, name: &str) -> Option<Event> {
        self.events.remove(name)
    }

    pub fn list(&self) -> Vec<&Event> {
        self.events.values().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 收集監聽某事件字串的處理器（只收集、不呼叫）
    pub fn listeners(&self, event: &str) -> Vec<(String, EventFn)> {
        self.events
            .values()
            .filter(|e| e.enabled && e.event == event)
            .map(|e| (e.name.clone(), e.handler.clone()))
            .collect()
    }

    pub fn bump(&mut self, name: &str) {
        if let Some(event) = self.events.get_mut(name) {
            event.count += 1;
        }
    }
}
