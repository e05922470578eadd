//! 腳本可見的 `session` 物件
//!
//! 提供給腳本的操作：send/output、擴充資料、觸發器/別名/計時器
//! 註冊、MSDP 讀取、版面訊息。註冊類呼叫讀取「目前模組」標記，
//! 把建立的名稱記到該模組帳上，供整組啟用/停用。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList};
use serde_json::Value;

use crate::alias::{Alias, AliasHandler};
use crate::msdp::MsdpValue;
use crate::session::{Session, UiMessage};
use crate::ticker::{TickerHandler, TickerRecord};
use crate::trigger::{Trigger, TriggerHandler};

static PANE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_pane_id(pane_type: &str) -> String {
    format!("{}-{}", pane_type, PANE_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// 暴露給 Python 的 Session 句柄
///
/// 持弱引用：Session 擁有直譯器狀態，直譯器狀態裡的這個物件
/// 不能反過來把 Session 釘在記憶體裡。
#[pyclass]
pub struct SessionApi {
    session: Weak<Session>,
}

impl SessionApi {
    pub(crate) fn new(session: Weak<Session>) -> Self {
        Self { session }
    }

    fn upgrade(&self) -> PyResult<Arc<Session>> {
        self.session
            .upgrade()
            .ok_or_else(|| PyRuntimeError::new_err("session 已經關閉"))
    }

    fn current_module(&self, session: &Session, operation: &str) -> PyResult<String> {
        session.script.current_module().ok_or_else(|| {
            PyRuntimeError::new_err(format!("{operation} 必須在模組載入流程中呼叫"))
        })
    }
}

#[pymethods]
impl SessionApi {
    /// 連線中時把命令（加上 CR LF）寫往伺服器
    fn send(&self, command: &str) -> PyResult<()> {
        self.upgrade()?.send_line(command);
        Ok(())
    }

    /// 附加文字到回捲緩衝並通知 UI
    fn output(&self, text: &str) -> PyResult<()> {
        self.upgrade()?.output(text);
        Ok(())
    }

    fn get_data(&self, py: Python<'_>, key: &str) -> PyResult<PyObject> {
        match self.upgrade()?.get_data(key) {
            Some(value) => json_to_py(py, &value),
            None => Ok(py.None()),
        }
    }

    fn set_data(&self, key: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        self.upgrade()?.set_data(key, py_to_json(value)?);
        Ok(())
    }

    /// 註冊觸發器。樣式編譯失敗時拋出例外、不做任何註冊。
    #[pyo3(signature = (name, pattern, handler, color = false))]
    fn register_trigger(
        &self,
        name: &str,
        pattern: &str,
        handler: Py<PyAny>,
        color: bool,
    ) -> PyResult<()> {
        let session = self.upgrade()?;
        let module = self.current_module(&session, "register_trigger")?;

        let trigger = Trigger::new(name, pattern, TriggerHandler::Script(handler))
            .map_err(|e| PyValueError::new_err(format!("無效的正則樣式: {e}")))?
            .with_color(color);

        session.add_trigger(trigger);
        session.track_module_trigger(&module, name);
        Ok(())
    }

    /// 註冊別名
    fn register_alias(&self, name: &str, pattern: &str, handler: Py<PyAny>) -> PyResult<()> {
        let session = self.upgrade()?;
        let module = self.current_module(&session, "register_alias")?;

        let alias = Alias::new(name, pattern, AliasHandler::Script(handler))
            .map_err(|e| PyValueError::new_err(format!("無效的正則樣式: {e}")))?;

        session.add_alias(alias);
        session.track_module_alias(&module, name);
        Ok(())
    }

    /// 註冊週期計時器
    fn add_timer(&self, name: &str, interval_ms: u64, handler: Py<PyAny>) -> PyResult<()> {
        if interval_ms == 0 {
            return Err(PyValueError::new_err("計時器週期必須為正整數"));
        }
        let session = self.upgrade()?;
        let module = self.current_module(&session, "add_timer")?;

        session.add_ticker(TickerRecord::with_handler(
            name,
            interval_ms,
            TickerHandler::Script(handler),
        ));
        session.track_module_timer(&module, name);
        Ok(())
    }

    fn remove_timer(&self, name: &str) -> PyResult<()> {
        let session = self.upgrade()?;
        let module = self.current_module(&session, "remove_timer")?;
        session.remove_ticker(name);
        session.untrack_module_timer(&module, name);
        Ok(())
    }

    /// 一次性計時器：本質是一顆觸發後「把自己移除」的普通計時器
    fn add_one_shot_timer(&self, name: &str, delay_ms: u64, handler: Py<PyAny>) -> PyResult<()> {
        if delay_ms == 0 {
            return Err(PyValueError::new_err("計時器延遲必須為正整數"));
        }
        let session = self.upgrade()?;
        let module = self.current_module(&session, "add_one_shot_timer")?;

        let timer_name = name.to_string();
        let module_name = module.clone();
        let fire: crate::ticker::NativeTickerFn = Arc::new(move |sess: &Arc<Session>| {
            let location = format!("one-shot timer {timer_name}");
            sess.call_script(&location, |py| handler.call0(py).map(|_| ()));
            sess.remove_ticker(&timer_name);
            sess.untrack_module_timer(&module_name, &timer_name);
        });

        session.add_ticker(TickerRecord::with_handler(
            name,
            delay_ms,
            TickerHandler::Native(fire),
        ));
        session.track_module_timer(&module, name);
        Ok(())
    }

    /// 環狀日誌目前的索引
    fn ringlog_current(&self) -> PyResult<usize> {
        Ok(self.upgrade()?.ringlog_current_index())
    }

    /// 取出閉區間的環狀日誌記錄（start > end 時回繞）
    fn ringlog_range(&self, py: Python<'_>, start: usize, end: usize) -> PyResult<PyObject> {
        let entries = self.upgrade()?.ringlog_range(start, end);
        let list = PyList::empty(py);
        for entry in entries {
            let dict = PyDict::new(py);
            dict.set_item("index", entry.index)?;
            dict.set_item("raw", entry.raw)?;
            dict.set_item("stripped", entry.stripped)?;
            list.append(dict)?;
        }
        Ok(list.into_any().unbind())
    }

    fn msdp_get_string(&self, key: &str) -> PyResult<String> {
        Ok(self.upgrade()?.msdp.get_string(key).unwrap_or_default())
    }

    fn msdp_get_int(&self, key: &str) -> PyResult<i64> {
        Ok(self.upgrade()?.msdp.get_int(key).unwrap_or(0))
    }

    fn msdp_get_bool(&self, key: &str) -> PyResult<bool> {
        Ok(self.upgrade()?.msdp.get_bool(key))
    }

    fn msdp_get_array(&self, py: Python<'_>, key: &str) -> PyResult<PyObject> {
        match self.upgrade()?.msdp.get_array(key) {
            Some(items) => {
                let list = PyList::empty(py);
                for item in &items {
                    list.append(msdp_to_py(py, item)?)?;
                }
                Ok(list.into_any().unbind())
            }
            None => Ok(py.None()),
        }
    }

    fn msdp_get_table(&self, py: Python<'_>, key: &str) -> PyResult<PyObject> {
        match self.upgrade()?.msdp.get_table(key) {
            Some(map) => {
                let dict = PyDict::new(py);
                for (k, v) in &map {
                    dict.set_item(k, msdp_to_py(py, v)?)?;
                }
                Ok(dict.into_any().unbind())
            }
            None => Ok(py.None()),
        }
    }

    fn msdp_get_all(&self, py: Python<'_>) -> PyResult<PyObject> {
        let snapshot = self.upgrade()?.msdp.snapshot();
        let dict = PyDict::new(py);
        for (k, v) in &snapshot {
            dict.set_item(k, msdp_to_py(py, v)?)?;
        }
        Ok(dict.into_any().unbind())
    }

    /// 分割版面，回傳新窗格 id。版面訊息是射後不理的 UI 訊息。
    #[pyo3(signature = (direction, pane_id = "main", pane_type = "sidebar", split_percent = 50))]
    fn layout_split(
        &self,
        direction: &str,
        pane_id: &str,
        pane_type: &str,
        split_percent: i64,
    ) -> PyResult<String> {
        let direction = match direction.to_lowercase().as_str() {
            "h" | "horizontal" => "horizontal",
            "v" | "vertical" => "vertical",
            _ => return Err(PyValueError::new_err("direction 必須是 'h' 或 'v'")),
        };
        if !(5..=95).contains(&split_percent) {
            return Err(PyValueError::new_err("分割比例必須在 5 到 95 之間"));
        }

        let session = self.upgrade()?;
        let new_pane_id = next_pane_id(pane_type);
        session.emit(UiMessage::Layout {
            session: session.name().to_string(),
            command: "split".to_string(),
            args: vec![
                pane_id.to_string(),
                new_pane_id.clone(),
                direction.to_string(),
                split_percent.to_string(),
                pane_type.to_string(),
            ],
        });
        Ok(new_pane_id)
    }

    fn layout_unsplit(&self, pane_id: &str) -> PyResult<()> {
        let session = self.upgrade()?;
        session.emit(UiMessage::Layout {
            session: session.name().to_string(),
            command: "unsplit".to_string(),
            args: vec![pane_id.to_string()],
        });
        Ok(())
    }

    fn layout_focus(&self, pane_id: &str) -> PyResult<()> {
        let session = self.upgrade()?;
        session.emit(UiMessage::Layout {
            session: session.name().to_string(),
            command: "focus".to_string(),
            args: vec![pane_id.to_string()],
        });
        Ok(())
    }

    fn layout_set_content(&self, pane_id: &str, content: &str) -> PyResult<()> {
        let session = self.upgrade()?;
        session.emit(UiMessage::Layout {
            session: session.name().to_string(),
            command: "set_content".to_string(),
            args: vec![pane_id.to_string(), content.to_string()],
        });
        Ok(())
    }
}

/// serde_json 值 → Python 物件
fn json_to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    Ok(match value {
        Value::Null => py.None(),
        Value::Bool(b) => PyBool::new(py, *b).to_owned().into_any().unbind(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into_pyobject(py)?.into_any().unbind()
            } else {
                n.as_f64().unwrap_or(0.0).into_pyobject(py)?.into_any().unbind()
            }
        }
        Value::String(s) => s.into_pyobject(py)?.into_any().unbind(),
        Value::Array(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(json_to_py(py, item)?)?;
            }
            list.into_any().unbind()
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (k, v) in map {
                dict.set_item(k, json_to_py(py, v)?)?;
            }
            dict.into_any().unbind()
        }
    })
}

/// Python 純量 → serde_json 值。bool 要先於整數判斷（Python 的
/// bool 是 int 的子型別）。
fn py_to_json(value: &Bound<'_, PyAny>) -> PyResult<Value> {
    if value.is_none() {
        return Ok(Value::Null);
    }
    if let Ok(b) = value.extract::<bool>() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.extract::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(f) = value.extract::<f64>() {
        return Ok(Value::from(f));
    }
    if let Ok(s) = value.extract::<String>() {
        return Ok(Value::String(s));
    }
    Err(PyTypeError::new_err("set_data 只接受純量值"))
}

/// MSDP 值 → Python 物件
fn msdp_to_py(py: Python<'_>, value: &MsdpValue) -> PyResult<PyObject> {
    Ok(match value {
        MsdpValue::String(s) => s.into_pyobject(py)?.into_any().unbind(),
        MsdpValue::Int(i) => (*i).into_pyobject(py)?.into_any().unbind(),
        MsdpValue::Array(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(msdp_to_py(py, item)?)?;
            }
            list.into_any().unbind()
        }
        MsdpValue::Table(map) => {
            let dict = PyDict::new(py);
            for (k, v) in map {
                dict.set_item(k, msdp_to_py(py, v)?)?;
            }
            dict.into_any().unbind()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::bare_session;

    #[test]
    fn test_set_and_get_data_roundtrip() {
        let session = bare_session("api");
        session
            .script
            .run_source(
                "<t>",
                r#"
session.set_data("hp", 42)
session.set_data("name", "Zed")
session.set_data("flag", True)
assert session.get_data("hp") == 42
assert session.get_data("name") == "Zed"
assert session.get_data("flag") is True
assert session.get_data("missing") is None
"#,
            )
            .unwrap();

        assert_eq!(session.get_data("hp"), Some(serde_json::json!(42)));
    }

    #[test]
    fn test_set_data_rejects_non_scalar() {
        let session = bare_session("api");
        let err = session
            .script
            .run_source("<t>", r#"session.set_data("bad", [1, 2])"#)
            .unwrap_err();
        assert!(err.to_string().contains("純量"));
    }

    #[test]
    fn test_register_trigger_requires_module_context() {
        let session = bare_session("api");
        let err = session
            .script
            .run_source(
                "<t>",
                r#"session.register_trigger("t", "x", lambda raw, line, caps: None)"#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("模組"));
    }

    #[test]
    fn test_register_trigger_bad_regex_raises() {
        let session = bare_session("api");
        let _scope = session.script.enter_module("unit");
        session.register_module_for_tests("unit");

        let err = session
            .script
            .run_source(
                "<t>",
                r#"session.register_trigger("bad", "(", lambda raw, line, caps: None)"#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("正則"));
        // 失敗的註冊不留痕跡
        assert!(session.triggers.read().unwrap().get("bad").is_none());
    }

    #[test]
    fn test_script_trigger_fires_on_line() {
        let session = bare_session("api");
        {
            let _scope = session.script.enter_module("unit");
            session.register_module_for_tests("unit");
            session
                .script
                .run_source(
                    "<t>",
                    r#"
def on_gold(raw, line, caps):
    session.set_data("gold", int(caps[1]))

session.register_trigger("gold", r"You receive (\d+) gold", on_gold)
"#,
                )
                .unwrap();
        }

        session.finalize_line(b"You receive 250 gold", false);
        assert_eq!(session.get_data("gold"), Some(serde_json::json!(250)));
        assert_eq!(session.triggers.read().unwrap().get("gold").unwrap().count, 1);
    }

    #[test]
    fn test_script_error_is_isolated() {
        // 隔離屏障：會拋例外的處理器不會讓行處理掛掉
        let session = bare_session("api");
        {
            let _scope = session.script.enter_module("unit");
            session.register_module_for_tests("unit");
            session
                .script
                .run_source(
                    "<t>",
                    r#"session.register_trigger("boom", "explode", lambda raw, line, caps: 1 / 0)"#,
                )
                .unwrap();
        }

        session.finalize_line(b"explode now", false);
        session.finalize_line(b"explode again", false);
        assert_eq!(session.triggers.read().unwrap().get("boom").unwrap().count, 2);
    }

    #[test]
    fn test_msdp_accessors_from_python() {
        let session = bare_session("api");
        let mut update = std::collections::BTreeMap::new();
        update.insert("ROOM_VNUM".to_string(), MsdpValue::from("2347"));
        update.insert(
            "COMMANDS".to_string(),
            MsdpValue::Array(vec![MsdpValue::from("look"), MsdpValue::from("say")]),
        );
        session.msdp.merge(&update);

        session
            .script
            .run_source(
                "<t>",
                r#"
assert session.msdp_get_string("ROOM_VNUM") == "2347"
assert session.msdp_get_int("ROOM_VNUM") == 2347
assert session.msdp_get_array("COMMANDS") == ["look", "say"]
assert session.msdp_get_array("ROOM_VNUM") is None
assert "ROOM_VNUM" in session.msdp_get_all()
"#,
            )
            .unwrap();
    }

    #[test]
    fn test_ringlog_visible_to_scripts() {
        let session = bare_session("api");
        session.finalize_line(b"first", false);
        session.finalize_line(b"second", false);

        session
            .script
            .run_source(
                "<t>",
                r#"
cur = session.ringlog_current()
window = session.ringlog_range(cur - 1, cur)
assert [e["stripped"] for e in window] == ["first", "second"]
"#,
            )
            .unwrap();
    }

    #[test]
    fn test_layout_split_validation() {
        let session = bare_session("api");
        assert!(session
            .script
            .run_source("<t>", r#"session.layout_split("diagonal")"#)
            .is_err());
        assert!(session
            .script
            .run_source("<t>", r#"session.layout_split("h", "main", "comms", 99)"#)
            .is_err());
        session
            .script
            .run_source("<t>", r#"pane = session.layout_split("h", "main", "comms", 30)"#)
            .unwrap();
    }
}
