//! 計時器模組
//!
//! 每個 Session 一張計時器表，由 50 毫秒一拍的協作迴圈驅動
//! （迴圈本身在 `session` 模組）。記錄可以帶處理器，或只帶一條
//! 到期就寫往連線的字面命令。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pyo3::prelude::*;

use crate::session::Session;

/// 原生計時器處理器
pub type NativeTickerFn = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

/// 計時器處理器
#[derive(Clone)]
pub enum TickerHandler {
    Native(NativeTickerFn),
    Script(Py<PyAny>),
}

impl std::fmt::Debug for TickerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickerHandler::Native(_) => f.write_str("TickerHandler::Native"),
            TickerHandler::Script(_) => f.write_str("TickerHandler::Script"),
        }
    }
}

/// 到期時要做的事：呼叫處理器，或送出字面命令
#[derive(Debug, Clone)]
pub enum TickerFire {
    Handler(TickerHandler),
    Command(String),
}

/// 計時器記錄
#[derive(Debug)]
pub struct TickerRecord {
    pub name: String,
    /// 週期（毫秒）
    pub interval_ms: u64,
    /// 處理器；`None` 時使用 `command`
    pub handler: Option<TickerHandler>,
    /// 到期寫往連線的字面命令（以標準行尾結尾）
    pub command: Option<String>,
    pub last_fire: Option<Instant>,
    pub next_fire: Instant,
    pub count: u64,
    /// 觸發次數上限；0 = 不限
    pub iterations: u64,
}

impl TickerRecord {
    /// 建立帶處理器的計時器，首次觸發在一個週期之後
    pub fn with_handler(name: impl Into<String>, interval_ms: u64, handler: TickerHandler) -> Self {
        Self {
            name: name.into(),
            interval_ms,
            handler: Some(handler),
            command: None,
            last_fire: None,
            next_fire: Instant::now() + Duration::from_millis(interval_ms),
            count: 0,
            iterations: 0,
        }
    }

    /// 建立字面命令計時器
    pub fn with_command(name: impl Into<String>, interval_ms: u64, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval_ms,
            handler: None,
            command: Some(command.into()),
            last_fire: None,
            next_fire: Instant::now() + Duration::from_millis(interval_ms),
            count: 0,
            iterations: 0,
        }
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    fn fire_action(&self) -> TickerFire {
        match (&self.handler, &self.command) {
            (Some(handler), _) => TickerFire::Handler(handler.clone()),
            (None, Some(command)) => TickerFire::Command(command.clone()),
            (None, None) => TickerFire::Command(String::new()),
        }
    }
}

/// 計時器管理器
#[derive(Debug, Default)]
pub struct TickerManager {
    entries: HashMap<String, TickerRecord>,
}

impl TickerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加計時器；同名者被取代
    pub fn add(&mut self, record: TickerRecord) {
        self.entries.insert(record.name.clone(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<TickerRecord> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&TickerRecord> {
        self.entries.get(name)
    }

    pub fn list(&self) -> Vec<&TickerRecord> {
        self.entries.values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 收集所有到期的計時器。只收集、不呼叫；
    /// 呼叫端放掉鎖之後執行，再以 [`settle`](Self::settle) 回報。
    pub fn due(&self, now: Instant) -> Vec<(String, TickerFire)> {
        self.entries
            .values()
            .filter(|r| r.next_fire <= now)
            .map(|r| (r.name.clone(), r.fire_action()))
            .collect()
    }

    /// 觸發之後的結算：計時器可能已被處理器移除（一次性計時器），
    /// 仍存在者更新計數與下次觸發時刻；達到次數上限者移除。
    pub fn settle(&mut self, name: &str, now: Instant) {
        let remove = match self.entries.get_mut(name) {
            Some(record) => {
                record.count += 1;
                record.last_fire = Some(now);
                record.next_fire = now + Duration::from_millis(record.interval_ms);
                record.iterations > 0 && record.count >= record.iterations
            }
            None => false,
        };
        if remove {
            self.entries.remove(name);
        }
    }
}
