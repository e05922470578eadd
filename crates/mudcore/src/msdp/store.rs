//! MSDP 變數容器
//!
//! 保存一條連線目前已知的 MSDP 變數。寫入者只有 Telnet 讀取執行緒，
//! 讀取者包含 UI、腳本與觸發器，因此採讀寫鎖：讀取端永遠不會
//! 看到寫到一半的複合值。

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::MsdpValue;

/// 每個 Session 一份的 MSDP 快照
#[derive(Debug, Default)]
pub struct MsdpStore {
    values: RwLock<BTreeMap<String, MsdpValue>>,
}

impl MsdpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合併一次解碼結果：逐鍵覆蓋，未出現的鍵保持原值。
    ///
    /// 伺服器送的是部分更新，所以不能整張表替換。
    pub fn merge(&self, update: &BTreeMap<String, MsdpValue>) {
        let mut values = self.values.write().unwrap();
        for (key, value) in update {
            values.insert(key.clone(), value.clone());
        }
    }

    /// 取出單一變數的複本
    pub fn get(&self, key: &str) -> Option<MsdpValue> {
        self.values.read().unwrap().get(key).cloned()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_int())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).map(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn get_array(&self, key: &str) -> Option<Vec<MsdpValue>> {
        self.get(key).and_then(|v| match v {
            MsdpValue::Array(items) => Some(items),
            _ => None,
        })
    }

    pub fn get_table(&self, key: &str) -> Option<BTreeMap<String, MsdpValue>> {
        self.get(key).and_then(|v| match v {
            MsdpValue::Table(map) => Some(map),
            _ => None,
        })
    }

    /// 整張表的防禦性複本，UI 迭代時不持有寫入鎖
    pub fn snapshot(&self) -> BTreeMap<String, MsdpValue> {
        self.values.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(pairs: &[(&str, MsdpValue)]) -> BTreeMap<String, MsdpValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merge_is_partial() {
        let store = MsdpStore::new();
        store.merge(&update(&[
            ("HEALTH", MsdpValue::from("100")),
            ("MANA", MsdpValue::from("40")),
        ]));
        store.merge(&update(&[("HEALTH", MsdpValue::from("85"))]));

        assert_eq!(store.get_string("HEALTH"), Some("85".to_string()));
        // 沒出現在更新裡的鍵不受影響
        assert_eq!(store.get_string("MANA"), Some("40".to_string()));
    }

    #[test]
    fn test_typed_accessors() {
        let store = MsdpStore::new();
        store.merge(&update(&[
            ("ROOM_VNUM", MsdpValue::from("2347")),
            ("PC_IN_ROOM", MsdpValue::from("1")),
            ("RANGED", MsdpValue::from("false")),
        ]));

        assert_eq!(store.get_int("ROOM_VNUM"), Some(2347));
        assert!(store.get_bool("PC_IN_ROOM"));
        assert!(!store.get_bool("RANGED"));
        assert!(!store.get_bool("MISSING"));
        assert_eq!(store.get_int("MISSING"), None);
    }

    #[test]
    fn test_snapshot_is_defensive() {
        let store = MsdpStore::new();
        store.merge(&update(&[("A", MsdpValue::from("1"))]));

        let snap = store.snapshot();
        store.merge(&update(&[("A", MsdpValue::from("2"))]));

        assert_eq!(snap.get("A"), Some(&MsdpValue::from("1")));
        assert_eq!(store.get_string("A"), Some("2".to_string()));
    }

    #[test]
    fn test_array_and_table_accessors() {
        let mut inner = BTreeMap::new();
        inner.insert("n".to_string(), MsdpValue::from("A"));

        let store = MsdpStore::new();
        store.merge(&update(&[
            ("GROUP", MsdpValue::Array(vec![MsdpValue::Table(inner.clone())])),
            ("ROOM", MsdpValue::Table(inner)),
        ]));

        assert_eq!(store.get_array("GROUP").map(|a| a.len()), Some(1));
        assert!(store.get_table("ROOM").is_some());
        assert_eq!(store.get_array("ROOM"), None);
        assert_eq!(store.get_table("GROUP"), None);
    }
}
