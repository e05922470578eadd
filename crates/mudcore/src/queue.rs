//! 命令佇列
//!
//! 以優先級排序的待送命令堆（最大堆，同優先級按插入順序）。
//! 每一項可以帶就緒判定，在取出時刻評估（不是在插入時刻）：
//! 「法力高於門檻才施法」這類前置條件要等到真正要送的那一刻才算數。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::session::Session;

/// 就緒判定：回傳 false 的項目這一輪被跳過
pub type QueueCheck = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// 佇列項目
#[derive(Clone)]
pub struct QueueItem {
    /// 單調遞增的識別碼（per session）
    pub id: u64,
    pub name: String,
    pub command: String,
    /// 相依項目：該 id 還在佇列中時本項不就緒
    pub dependency: Option<u64>,
    pub check: Option<QueueCheck>,
    /// 數字越大越先出堆
    pub priority: i64,
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("command", &self.command)
            .field("dependency", &self.dependency)
            .field("priority", &self.priority)
            .field("has_check", &self.check.is_some())
            .finish()
    }
}

impl QueueItem {
    pub fn new(name: impl Into<String>, command: impl Into<String>, priority: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            command: command.into(),
            dependency: None,
            check: None,
            priority,
        }
    }

    pub fn with_check(mut self, check: QueueCheck) -> Self {
        self.check = Some(check);
        self
    }

    pub fn with_dependency(mut self, id: u64) -> Self {
        self.dependency = Some(id);
        self
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.id == other.id
    }
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // 高優先級先出；同優先級時 id 小（先插入）者先出
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 命令佇列
#[derive(Debug, Default)]
pub struct CommandQueue {
    heap: BinaryHeap<QueueItem>,
    last_id: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入並回傳新項目的 id（方便串接相依鏈）
    pub fn add(&mut self, mut item: QueueItem) -> u64 {
        item.id = self.last_id;
        self.last_id += 1;
        let id = item.id;
        self.heap.push(item);
        id
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// 不清空地取得排序後的視圖
    pub fn view(&self) -> Vec<QueueItem> {
        let mut sorted: Vec<QueueItem> = self.heap.iter().cloned().collect();
        sorted.sort_by(|a, b| b.cmp(a));
        sorted
    }

    /// 取出優先級最高且就緒的項目。
    ///
    /// 從堆頂開始，不就緒者暫放側列；找到就緒項後把側列全數放回。
    pub fn next_ready(&mut self, session: &Session) -> Option<QueueItem> {
        let mut skipped: Vec<QueueItem> = Vec::new();
        let mut found = None;

        while let Some(item) = self.heap.pop() {
            let dependency_met = match item.dependency {
                Some(dep) => {
                    !self.heap.iter().any(|i| i.id == dep) && !skipped.iter().any(|i| i.id == dep)
                }
                None => true,
            };
            let check_passed = match &item.check {
                Some(check) => check(session),
                None => true,
            };

            if dependency_met && check_passed {
                found = Some(item);
                break;
            }
            skipped.push(item);
        }

        for item in skipped {
            self.heap.push(item);
        }
        found
    }
}
