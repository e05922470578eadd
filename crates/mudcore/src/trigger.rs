//! 觸發器（Action）模組
//!
//! 每一行完成的 MUD 輸出都會掃過已啟用的觸發器；樣式命中就以
//! 該行與捕獲群組呼叫處理器。比對對象依 `color` 旗標決定是
//! 含 ANSI 的原文還是去色後的純文字。

use std::collections::HashMap;
use std::sync::Arc;

use pyo3::prelude::*;
use regex::Regex;

use crate::session::Session;

/// 原生觸發器處理器：接收 Session 與比對結果
pub type NativeTriggerFn = Arc<dyn Fn(&Arc<Session>, &TriggerMatch) + Send + Sync>;

/// 觸發器處理器：原生閉包或腳本可呼叫物件
#[derive(Clone)]
pub enum TriggerHandler {
    Native(NativeTriggerFn),
    Script(Py<PyAny>),
}

impl std::fmt::Debug for TriggerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerHandler::Native(_) => f.write_str("TriggerHandler::Native"),
            TriggerHandler::Script(_) => f.write_str("TriggerHandler::Script"),
        }
    }
}

/// 一次命中的上下文
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    /// 含 ANSI 的原始行
    pub ansi_line: String,
    /// 去色後的行
    pub line: String,
    /// 捕獲群組：索引 0 為整段命中，其後為各群組（未命中的群組為空字串）
    pub captures: Vec<String>,
}

/// 觸發器定義
#[derive(Debug, Clone)]
pub struct Trigger {
    pub name: String,
    pub pattern: String,
    /// 以含顏色的原文比對？
    pub color: bool,
    pub enabled: bool,
    pub count: u64,
    regex: Regex,
    pub handler: TriggerHandler,
}

impl Trigger {
    /// 建立觸發器；樣式無法編譯時回傳錯誤、不做任何註冊
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        handler: TriggerHandler,
    ) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let regex = Regex::new(&pattern)?;
        Ok(Self {
            name: name.into(),
            pattern,
            color: false,
            enabled: true,
            count: 0,
            regex,
            handler,
        })
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// 對一行輸出嘗試比對
    pub fn try_match(&self, ansi_line: &str, stripped: &str) -> Option<TriggerMatch> {
        if !self.enabled {
            return None;
        }
        let target = if self.color { ansi_line } else { stripped };
        let captures = self.regex.captures(target)?;

        let groups: Vec<String> = captures
            .iter()
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();

        Some(TriggerMatch {
            ansi_line: ansi_line.to_string(),
            line: stripped.to_string(),
            captures: groups,
        })
    }
}

/// 觸發器管理器
#[derive(Debug, Default)]
pub struct TriggerManager {
    triggers: HashMap<String, Trigger>,
}

impl TriggerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加觸發器；同名者被取代（名稱在註冊表內唯一）
    pub fn add(&mut self, trigger: Trigger) {
        self.triggers.insert(trigger.name.clone(), trigger);
    }

    pub fn remove(&mut self, name: &str) -> Option<Trigger> {
        self.triggers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Trigger> {
        self.triggers.get(name)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.triggers.get_mut(name) {
            Some(trigger) => {
                trigger.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<&Trigger> {
        self.triggers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// 掃描一行，回傳所有命中的 (名稱, 處理器, 上下文)。
    ///
    /// 只收集、不呼叫：呼叫端放掉鎖之後再執行處理器，
    /// 處理器才能安全地回頭註冊新的觸發器。
    pub fn matches(&self, ansi_line: &str, stripped: &str) -> Vec<(String, TriggerHandler, TriggerMatch)> {
        self.triggers
            .values()
            .filter_map(|t| {
                t.try_match(ansi_line, stripped)
                    .map(|m| (t.name.clone(), t.handler.clone(), m))
            })
            .collect()
    }

    /// 命中後累加計數
    pub fn bump(&mut self, name: &str) {
        if let Some(trigger) = self.triggers.get_mut(name) {
            trigger.count += 1;
        }
    }
}
