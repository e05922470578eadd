//! 腳本模組載入
//!
//! 模組是一個目錄：`init.py` 為進入點，`triggers/`、`aliases/`、
//! `scripts/` 子目錄放附加來源。載入順序：先全域模組目錄、
//! 後 Session 專屬目錄；目錄內按檔名排序執行。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::engine::ScriptError;
use crate::paths;
use crate::session::Session;

/// 已載入的模組與它註冊過的名稱
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    pub enabled: bool,
    pub triggers: Vec<String>,
    pub aliases: Vec<String>,
    pub timers: Vec<String>,
}

impl Module {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            enabled: true,
            triggers: Vec::new(),
            aliases: Vec::new(),
            timers: Vec::new(),
        }
    }
}

/// 模組註冊表
#[derive(Debug, Default)]
pub struct ModuleManager {
    modules: HashMap<String, Module>,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.modules.get_mut(name)
    }

    pub fn list(&self) -> Vec<&Module> {
        self.modules.values().collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn track_trigger(&mut self, module: &str, name: &str) {
        if let Some(m) = self.modules.get_mut(module) {
            m.triggers.push(name.to_string());
        }
    }

    pub fn track_alias(&mut self, module: &str, name: &str) {
        if let Some(m) = self.modules.get_mut(module) {
            m.aliases.push(name.to_string());
        }
    }

    pub fn track_timer(&mut self, module: &str, name: &str) {
        if let Some(m) = self.modules.get_mut(module) {
            m.timers.push(name.to_string());
        }
    }

    pub fn untrack_timer(&mut self, module: &str, name: &str) {
        if let Some(m) = self.modules.get_mut(module) {
            m.timers.retain(|t| t != name);
        }
    }
}

/// 載入全域模組目錄下的所有模組
pub fn load_global_modules(session: &Arc<Session>) -> Result<(), ScriptError> {
    match paths::global_modules_dir() {
        Some(dir) => load_modules_from_dir(session, &dir),
        None => Ok(()),
    }
}

/// 載入某 Session 專屬目錄下的所有模組
pub fn load_session_modules(session: &Arc<Session>, session_name: &str) -> Result<(), ScriptError> {
    match paths::session_modules_dir(session_name) {
        Some(dir) => load_modules_from_dir(session, &dir),
        None => Ok(()),
    }
}

fn load_modules_from_dir(session: &Arc<Session>, dir: &Path) -> Result<(), ScriptError> {
    if !dir.exists() {
        // 目錄不存在不是錯誤
        return Ok(());
    }

    for path in sorted_entries(dir)? {
        if !path.is_dir() || !path.join("init.py").exists() {
            continue;
        }
        if let Err(err) = load_module(session, &path) {
            warn!(module = %path.display(), %err, "模組載入失敗");
        }
    }
    Ok(())
}

/// 載入單一模組目錄
pub fn load_module(session: &Arc<Session>, module_path: &Path) -> Result<(), ScriptError> {
    let name = module_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| module_path.display().to_string());

    let init = module_path.join("init.py");
    if !init.exists() {
        return Err(ScriptError::MissingInit(module_path.to_path_buf()));
    }

    // 先註冊再執行，進入點裡的註冊呼叫才有帳可記
    session.register_module(Module::new(&name, module_path));

    let _scope = session.script.enter_module(&name);
    session.script.run_file(&init)?;

    for subdir in ["triggers", "aliases", "scripts"] {
        let dir = module_path.join(subdir);
        if !dir.exists() {
            continue;
        }
        for file in sorted_entries(&dir)? {
            if file.extension().map(|e| e == "py") != Some(true) {
                continue;
            }
            if let Err(err) = session.script.run_file(&file) {
                warn!(file = %file.display(), %err, "模組來源執行失敗");
            }
        }
    }

    info!(module = %name, path = %module_path.display(), "已載入模組");
    Ok(())
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::bare_session;
    use std::fs;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn temp_module(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("mudmux_module_tests")
            .join(format!("{}_{}", name, std::process::id()))
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_module_registers_and_tracks() {
        let dir = temp_module("hunter");
        write(
            &dir.join("init.py"),
            r#"
session.register_trigger("prey", "A rabbit hops by", lambda raw, line, caps: session.send("kill rabbit"))
session.register_alias("hh", "^hh$", lambda caps: session.send("hunt"))
"#,
        );
        write(
            &dir.join("triggers").join("extra.py"),
            r#"session.register_trigger("prey2", "A deer grazes", lambda raw, line, caps: None)"#,
        );

        let session = bare_session("m");
        load_module(&session, &dir).unwrap();

        let modules = session.modules.read().unwrap();
        let module = modules.get("hunter").unwrap();
        assert!(module.enabled);
        assert_eq!(module.triggers, vec!["prey", "prey2"]);
        assert_eq!(module.aliases, vec!["hh"]);
        drop(modules);

        assert!(session.triggers.read().unwrap().get("prey").is_some());
        assert!(session.triggers.read().unwrap().get("prey2").is_some());
        assert!(session.aliases.read().unwrap().get("hh").is_some());
        // 載入完成後標記要清掉
        assert_eq!(session.script.current_module(), None);
    }

    #[test]
    fn test_missing_init_rejected() {
        let dir = temp_module("empty");
        let session = bare_session("m");
        assert!(matches!(
            load_module(&session, &dir),
            Err(ScriptError::MissingInit(_))
        ));
    }

    #[test]
    fn test_disable_module_disables_group() {
        let dir = temp_module("pack");
        write(
            &dir.join("init.py"),
            r#"
session.register_trigger("t1", "one", lambda raw, line, caps: None)
session.register_alias("a1", "^a1$", lambda caps: None)
session.add_timer("tm1", 60000, lambda: None)
"#,
        );

        let session = bare_session("m");
        load_module(&session, &dir).unwrap();

        session.disable_module("pack").unwrap();
        assert!(!session.triggers.read().unwrap().get("t1").unwrap().enabled);
        assert!(!session.aliases.read().unwrap().get("a1").unwrap().enabled);
        // 計時器整顆移除
        assert!(!session.tickers.read().unwrap().contains("tm1"));

        session.enable_module("pack").unwrap();
        assert!(session.triggers.read().unwrap().get("t1").unwrap().enabled);
        assert!(session.aliases.read().unwrap().get("a1").unwrap().enabled);
    }

    #[test]
    fn test_unknown_module_errors() {
        let session = bare_session("m");
        assert!(session.disable_module("nope").is_err());
        assert!(session.enable_module("nope").is_err());
    }

    #[test]
    fn test_broken_init_fails_load() {
        let dir = temp_module("broken");
        write(&dir.join("init.py"), "this is not python (");

        let session = bare_session("m");
        assert!(matches!(
            load_module(&session, &dir),
            Err(ScriptError::Python(_))
        ));
    }
}
