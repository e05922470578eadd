//! 腳本引擎
//!
//! 每個 Session 一份 Python 命名空間。所有 host→script 呼叫都
//! 必須經過隔離屏障（見 `session` 模組的 `call_script`）：腳本出錯
//! 只記錄、回報，絕不打斷事件迴圈。

use std::path::Path;
use std::sync::{Arc, Mutex};

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTracebackMethods};
use thiserror::Error;

use crate::session::Session;

/// 腳本執行錯誤
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Python 錯誤: {0}")]
    Python(String),

    #[error("腳本 IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    #[error("模組缺少 init.py: {}", .0.display())]
    MissingInit(std::path::PathBuf),
}

impl From<PyErr> for ScriptError {
    fn from(err: PyErr) -> Self {
        ScriptError::Python(err.to_string())
    }
}

/// 把 Python 例外連同回溯渲染成可記錄的字串
pub fn render_py_err(py: Python<'_>, err: &PyErr) -> String {
    match err.traceback(py) {
        Some(tb) => match tb.format() {
            Ok(formatted) => format!("{err}\n{formatted}"),
            Err(_) => err.to_string(),
        },
        None => err.to_string(),
    }
}

/// Python 腳本引擎
pub struct ScriptEngine {
    /// Session 專屬的全域命名空間
    globals: Py<PyDict>,
    /// 目前模組標記：註冊 API 以此把名稱記到模組帳上
    current_module: Mutex<Option<String>>,
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("current_module", &self.current_module.lock().unwrap())
            .finish()
    }
}

impl ScriptEngine {
    /// 建立新的命名空間並掛上 builtins
    pub fn new() -> Result<Self, ScriptError> {
        Python::with_gil(|py| {
            let globals = PyDict::new(py);
            let builtins = py.import("builtins")?;
            globals.set_item("__builtins__", &builtins)?;
            Ok(Self {
                globals: globals.into(),
                current_module: Mutex::new(None),
            })
        })
    }

    /// 把 `session` API 物件安裝進命名空間
    pub(crate) fn install_api(&self, session: &Arc<Session>) -> Result<(), ScriptError> {
        Python::with_gil(|py| {
            let api = super::SessionApi::new(Arc::downgrade(session));
            self.globals.bind(py).set_item("session", Py::new(py, api)?)?;
            Ok(())
        })
    }

    /// 取得命名空間（供情境注入器填入全域值）
    pub fn globals<'py>(&self, py: Python<'py>) -> Bound<'py, PyDict> {
        self.globals.bind(py).clone()
    }

    /// 編譯並執行一段程式碼，`label` 用於錯誤訊息的檔名欄位
    pub fn run_source(&self, label: &str, code: &str) -> Result<(), ScriptError> {
        Python::with_gil(|py| {
            let globals = self.globals.bind(py);
            let builtins = py.import("builtins")?;
            let compile = builtins.getattr("compile")?;
            let code_obj = compile.call1((code, label, "exec"))?;
            builtins.getattr("exec")?.call1((code_obj, globals))?;
            Ok(())
        })
    }

    /// 讀取並執行一個腳本檔
    pub fn run_file(&self, path: &Path) -> Result<(), ScriptError> {
        let code = std::fs::read_to_string(path)?;
        self.run_source(&path.display().to_string(), &code)
    }

    /// 驗證語法而不執行
    pub fn validate(&self, code: &str) -> Result<(), ScriptError> {
        Python::with_gil(|py| {
            let builtins = py.import("builtins")?;
            let compile = builtins.getattr("compile")?;
            compile.call1((code, "<script>", "exec"))?;
            Ok(())
        })
    }

    /// 目前模組標記
    pub fn current_module(&self) -> Option<String> {
        self.current_module.lock().unwrap().clone()
    }

    /// 進入模組範圍：建構時設定標記，釋放時還原前一個。
    /// 範圍化的標記取代了可變全域，巢狀載入也不會弄丟外層。
    pub fn enter_module(&self, name: &str) -> ModuleScope<'_> {
        let previous = self
            .current_module
            .lock()
            .unwrap()
            .replace(name.to_string());
        ModuleScope {
            engine: self,
            previous,
        }
    }
}

/// 目前模組標記的範圍守衛
pub struct ModuleScope<'a> {
    engine: &'a ScriptEngine,
    previous: Option<String>,
}

impl Drop for ModuleScope<'_> {
    fn drop(&mut self) {
        *self.engine.current_module.lock().unwrap() = self.previous.take();
    }
}
