//! Python 腳本支援模組
//!
//! 使用 PyO3 把 Python 直譯器嵌進每個 Session：
//! - `engine`: 命名空間、目前模組標記、程式碼執行
//! - `api`: 暴露給腳本的 `session` 物件
//! - `module`: 磁碟上的模組載入（`init.py` + 子目錄）

mod api;
mod engine;
mod module;

pub use api::SessionApi;
pub use engine::{render_py_err, ModuleScope, ScriptEngine, ScriptError};
pub use module::{
    load_global_modules, load_module, load_session_modules, Module, ModuleManager,
};
