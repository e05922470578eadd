//! 設定目錄探索
//!
//! 遵循平台慣例（XDG 等）定位 mudmux 的設定與模組目錄。
//! 模組掃描順序：全域目錄在前，Session 專屬目錄在後。

use std::fs;
use std::io;
use std::path::PathBuf;

/// `<平台設定目錄>/mudmux`，找不到時退回 `~/.config/mudmux`
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|dir| dir.join("mudmux"))
}

/// 全域模組目錄
pub fn global_modules_dir() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("modules"))
}

/// 單一 Session 的設定目錄
pub fn session_dir(session_name: &str) -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("sessions").join(session_name))
}

/// 單一 Session 的模組目錄
pub fn session_modules_dir(session_name: &str) -> Option<PathBuf> {
    session_dir(session_name).map(|dir| dir.join("modules"))
}

/// 錯誤日誌檔路徑
pub fn panic_log_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("panic.log"))
}

/// 確保設定目錄結構存在
pub fn ensure_config_dirs() -> io::Result<()> {
    let Some(config) = config_dir() else {
        return Err(io::Error::new(io::ErrorKind::NotFound, "找不到平台設定目錄"));
    };
    fs::create_dir_all(&config)?;
    fs::create_dir_all(config.join("modules"))?;
    fs::create_dir_all(config.join("sessions"))?;
    Ok(())
}
