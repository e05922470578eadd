//! 錯誤日誌槽
//!
//! 所有工作執行緒與腳本的不可回復錯誤都附加到同一個文字檔：
//! 時間戳、發生位置、捕捉到的值、回溯。事件迴圈本身永不因此中止。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::paths;

lazy_static::lazy_static! {
    static ref SINK_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);
}

/// 覆寫日誌檔路徑（測試用）
pub fn set_sink(path: PathBuf) {
    *SINK_OVERRIDE.lock().unwrap() = Some(path);
}

fn sink_path() -> Option<PathBuf> {
    if let Some(path) = SINK_OVERRIDE.lock().unwrap().clone() {
        return Some(path);
    }
    paths::panic_log_path()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 附加一筆錯誤記錄
pub fn log_panic(location: &str, value: &str, backtrace: &str) {
    tracing::error!(location, %value, "捕捉到錯誤，寫入 panic.log");

    let Some(path) = sink_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let _ = writeln!(
            file,
            "=== PANIC at {} ===\nTime: {}\nPanic: {}\n\nStack trace:\n{}\n",
            location,
            epoch_secs(),
            value,
            backtrace
        );
    }
}

/// 把 `catch_unwind` 撈到的負載轉為可記錄的字串
pub fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
