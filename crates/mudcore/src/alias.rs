//! 別名模組
//!
//! 使用者輸入送往連線之前先掃過別名註冊表；第一個命中的已啟用
//! 別名「吃掉」這筆輸入，原始命令不再送往伺服器。

use std::collections::HashMap;
use std::sync::Arc;

use pyo3::prelude::*;
use regex::Regex;

use crate::session::Session;

/// 原生別名處理器：接收 Session 與捕獲群組
pub type NativeAliasFn = Arc<dyn Fn(&Arc<Session>, &[String]) + Send + Sync>;

/// 別名處理器
#[derive(Clone)]
pub enum AliasHandler {
    Native(NativeAliasFn),
    Script(Py<PyAny>),
}

impl std::fmt::Debug for AliasHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AliasHandler::Native(_) => f.write_str("AliasHandler::Native"),
            AliasHandler::Script(_) => f.write_str("AliasHandler::Script"),
        }
    }
}

/// 別名定義
#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub pattern: String,
    pub enabled: bool,
    pub count: u64,
    regex: Regex,
    pub handler: AliasHandler,
}

impl Alias {
    /// 建立別名；樣式無法編譯時回傳錯誤、不做任何註冊
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        handler: AliasHandler,
    ) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let regex = Regex::new(&pattern)?;
        Ok(Self {
            name: name.into(),
            pattern,
            enabled: true,
            count: 0,
            regex,
            handler,
        })
    }

    fn try_match(&self, input: &str) -> Option<Vec<String>> {
        if !self.enabled {
            return None;
        }
        let captures = self.regex.captures(input)?;
        Some(
            captures
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

/// 別名管理器
#[derive(Debug, Default)]
pub struct AliasManager {
    aliases: HashMap<String, Alias>,
}

impl AliasManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加別名；同名者被取代
    pub fn add(&mut self, alias: Alias) {
        self.aliases.insert(alias.name.clone(), alias);
    }

    pub fn remove(&mut self, name: &str) -> Option<Alias> {
        self.aliases.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Alias> {
        self.aliases.get(name)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.aliases.get_mut(name) {
            Some(alias) => {
                alias.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<&Alias> {
        self.aliases.values().collect()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// 找出第一個命中的別名。只收集、不呼叫；
    /// 呼叫端在放掉鎖之後執行處理器並回報 [`bump`](Self::bump)。
    pub fn find_match(&self, input: &str) -> Option<(String, AliasHandler, Vec<String>)> {
        let input = input.trim();
        self.aliases
            .values()
            .find_map(|a| a.try_match(input).map(|caps| (a.name.clone(), a.handler.clone(), caps)))
    }

    /// 命中後累加計數
    pub fn bump(&mut self, name: &str) {
        if let Some(alias) = self.aliases.get_mut(name) {
            alias.count += 1;
        }
    }
}
