//! 環狀行日誌
//!
//! 固定容量（預設 10 000 槽）的索引式緩衝區，保存最近收到的每一行
//! （含 ANSI 顏色的原文與去色後的純文字）。索引以 mod N 單調遞增，
//! 是腳本回掃最近輸出視窗（例如提示之間的房間描述）的權威來源。

/// 單筆環狀日誌記錄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingEntry {
    /// 環內索引，範圍 [0, N)
    pub index: usize,
    /// 寫入時刻（epoch 奈秒）
    pub epoch_ns: u64,
    /// 選填的情境標記
    pub context: Option<String>,
    /// 含跳脫碼的原始行
    pub raw: String,
    /// 去除 ANSI 後的純文字行
    pub stripped: String,
}

/// 預設環容量
pub const DEFAULT_RING_CAPACITY: usize = 10_000;

/// 固定容量的索引式環
#[derive(Debug)]
pub struct RingLog {
    slots: Vec<Option<RingEntry>>,
    current: usize,
}

impl RingLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 1, "環容量至少要有兩個槽");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, current: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 寫入一行：指派 `(current + 1) mod N`，覆蓋該槽的舊值
    pub fn append(&mut self, epoch_ns: u64, raw: String, stripped: String) -> usize {
        self.append_tagged(epoch_ns, None, raw, stripped)
    }

    /// 同 [`append`](Self::append)，另附情境標記
    pub fn append_tagged(
        &mut self,
        epoch_ns: u64,
        context: Option<String>,
        raw: String,
        stripped: String,
    ) -> usize {
        let index = (self.current + 1) % self.slots.len();
        self.slots[index] = Some(RingEntry {
            index,
            epoch_ns,
            context,
            raw,
            stripped,
        });
        self.current = index;
        index
    }

    /// 最近一次指派的索引
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// O(1) 取出單槽；從未寫入過的槽回傳 `None`
    pub fn get(&self, index: usize) -> Option<&RingEntry> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    /// 取出閉區間 `[start, end]` 的記錄。
    ///
    /// `start <= end` 時按索引序回傳；否則視為跨越環尾的回繞，
    /// 回傳 `[start..N-1]` 接 `[0..end]`。從未寫入的槽會被略過。
    pub fn range(&self, start: usize, end: usize) -> Vec<RingEntry> {
        let n = self.slots.len();
        if start >= n || end >= n {
            return Vec::new();
        }

        let indices: Vec<usize> = if start <= end {
            (start..=end).collect()
        } else {
            (start..n).chain(0..=end).collect()
        };

        indices
            .into_iter()
            .filter_map(|i| self.slots[i].clone())
            .collect()
    }
}

impl Default for RingLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(log: &mut RingLog, text: &str) -> usize {
        log.append(0, text.to_string(), text.to_string())
    }

    #[test]
    fn test_index_monotonic_mod_n() {
        // 第二次寫入的索引 = (第一次 + 1) mod N
        let mut log = RingLog::with_capacity(5);
        let first = push(&mut log, "a");
        let second = push(&mut log, "b");
        assert_eq!(second, (first + 1) % log.capacity());
        assert_eq!(log.current_index(), second);
    }

    #[test]
    fn test_wraps_and_overwrites() {
        let mut log = RingLog::with_capacity(3);
        for i in 0..7 {
            push(&mut log, &i.to_string());
        }
        // 7 筆寫入、容量 3：只留最後三筆
        let live: Vec<_> = (0..3).filter_map(|i| log.get(i)).collect();
        assert_eq!(live.len(), 3);
        let texts: Vec<_> = live.iter().map(|e| e.raw.as_str()).collect();
        for t in ["4", "5", "6"] {
            assert!(texts.contains(&t), "missing {t} in {texts:?}");
        }
    }

    #[test]
    fn test_get_unfilled_slot() {
        let log = RingLog::with_capacity(4);
        assert!(log.get(2).is_none());
        assert!(log.get(99).is_none());
    }

    #[test]
    fn test_range_in_order() {
        let mut log = RingLog::with_capacity(10);
        for i in 0..5 {
            push(&mut log, &format!("line{i}"));
        }
        let entries = log.range(1, 3);
        let texts: Vec<_> = entries.iter().map(|e| e.raw.as_str()).collect();
        assert_eq!(texts, vec!["line0", "line1", "line2"]);
    }

    #[test]
    fn test_range_wraps() {
        let mut log = RingLog::with_capacity(4);
        for i in 0..6 {
            push(&mut log, &i.to_string());
        }
        // current 走到 (0+6) mod 4 = 2; 槽 3→"2", 0→"3", 1→"4", 2→"5"
        let entries = log.range(3, 1);
        let texts: Vec<_> = entries.iter().map(|e| e.raw.as_str()).collect();
        assert_eq!(texts, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_range_skips_unfilled() {
        let mut log = RingLog::with_capacity(8);
        push(&mut log, "only");
        let entries = log.range(0, 7);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw, "only");
    }

    #[test]
    fn test_context_tag() {
        let mut log = RingLog::with_capacity(4);
        let idx = log.append_tagged(42, Some("prompt".into()), "hp>".into(), "hp>".into());
        let entry = log.get(idx).unwrap();
        assert_eq!(entry.context.as_deref(), Some("prompt"));
        assert_eq!(entry.epoch_ns, 42);
    }
}
