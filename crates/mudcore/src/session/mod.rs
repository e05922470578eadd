//! Session 模組
//!
//! 每個 Session 代表一條獨立的 MUD 連線，獨佔自己的：
//! - Telnet 解譯器與選項協商
//! - MSDP 容器、環狀日誌、回捲緩衝
//! - 觸發器/別名/計時器/佇列/事件/模組註冊表
//! - Python 腳本狀態
//!
//! 併發模型：每個 Session 兩條長駐執行緒，讀取執行緒（阻塞在
//! socket 上，20 毫秒讀取期限兼作閒置沖洗點）與計時執行緒
//! （50 毫秒一拍）。取消是一面旗：計時迴圈下一拍退出、
//! 讀取迴圈下一個期限退出，兩者都返回後 Session 即可安全丟棄。

mod commands;
mod handler;
mod messages;

pub use handler::SessionHandler;
pub use messages::UiMessage;

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use pyo3::prelude::*;
use pyo3::types::PyList;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::alias::{Alias, AliasHandler, AliasManager};
use crate::ansi;
use crate::event::{Event, EventData, EventManager};
use crate::msdp::store::MsdpStore;
use crate::msdp::{self, MsdpValue};
use crate::panic_log;
use crate::queue::{CommandQueue, QueueItem};
use crate::ringlog::{RingEntry, RingLog};
use crate::script::{self, Module, ModuleManager, ScriptEngine, ScriptError};
use crate::telnet::{
    Negotiator, TelnetEvent, TelnetMachine, TelnetOption, LINE_TERMINATOR,
};
use crate::ticker::{TickerFire, TickerHandler, TickerManager, TickerRecord};
use crate::trigger::{Trigger, TriggerHandler, TriggerManager};

/// Session 錯誤
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session 名稱不可為空")]
    EmptyName,

    #[error("Session 名稱不可包含空白: {0}")]
    InvalidName(String),

    #[error("位址格式錯誤（需要 host:port）: {0}")]
    InvalidAddress(String),

    #[error("Session 已存在: {0}")]
    DuplicateName(String),

    #[error("DNS 解析失敗: {0}")]
    DnsResolutionFailed(String),

    #[error("連線逾時")]
    Timeout,

    #[error("連線失敗: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    #[error("模組不存在: {0}")]
    UnknownModule(String),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// 連線與讀取參數
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 連線逾時
    pub connect_timeout: Duration,
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
    /// 閒置沖洗間隔（讀取期限）。輸出零碎的伺服器可調大。
    pub idle_flush: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_buffer_size: 4096,
            idle_flush: Duration::from_millis(20),
        }
    }
}

/// 情境注入器：在 Session 啟動、MSDP 合併後、每行之後重跑，
/// 讓腳本看到的全域值保持新鮮
pub type ContextInjector =
    Arc<dyn for<'py> Fn(&Arc<Session>, Python<'py>) -> PyResult<()> + Send + Sync>;

/// MSDP 更新掛鉤：合併完成後以本次更新的鍵值呼叫。
/// 掛鉤在寫入端同步執行，看到的是合併後的完整狀態；不得再呼叫合併。
pub type MsdpHook = Arc<dyn Fn(&Arc<Session>, &BTreeMap<String, MsdpValue>) + Send + Sync>;

/// MUD 行掛鉤：每行定案後以（原文, 去色文）呼叫
pub type LineHook = Arc<dyn Fn(&Arc<Session>, &str, &str) + Send + Sync>;

/// 一條 MUD 連線與其全部下屬狀態
pub struct Session {
    name: String,
    birth: Instant,
    config: SessionConfig,

    address: RwLock<Option<String>>,
    socket: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    password_mode: AtomicBool,
    cancelled: AtomicBool,
    write_failures: AtomicU32,

    content: Mutex<String>,
    sub: mpsc::Sender<UiMessage>,

    /// MSDP 變數容器
    pub msdp: MsdpStore,
    pub(crate) ringlog: RwLock<RingLog>,
    pub(crate) triggers: RwLock<TriggerManager>,
    pub(crate) aliases: RwLock<AliasManager>,
    pub(crate) tickers: RwLock<TickerManager>,
    pub(crate) events: RwLock<EventManager>,
    pub(crate) queue: Mutex<CommandQueue>,
    pub(crate) modules: RwLock<ModuleManager>,
    data: RwLock<HashMap<String, Value>>,

    /// 腳本引擎
    pub(crate) script: ScriptEngine,
    injectors: RwLock<HashMap<String, ContextInjector>>,
    msdp_hooks: RwLock<HashMap<String, MsdpHook>>,
    line_hooks: RwLock<HashMap<String, LineHook>>,

    reader_handle: Mutex<Option<JoinHandle<()>>>,
    ticker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("address", &*self.address.read().unwrap())
            .finish()
    }
}

fn epoch_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

impl Session {
    /// 建立尚未連線的 Session
    pub fn new(name: &str, sub: mpsc::Sender<UiMessage>) -> Result<Arc<Self>, SessionError> {
        Self::with_config(name, sub, SessionConfig::default())
    }

    pub fn with_config(
        name: &str,
        sub: mpsc::Sender<UiMessage>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let session = Arc::new(Self {
            name: name.to_string(),
            birth: Instant::now(),
            config,
            address: RwLock::new(None),
            socket: Mutex::new(None),
            connected: AtomicBool::new(false),
            password_mode: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            write_failures: AtomicU32::new(0),
            content: Mutex::new(String::new()),
            sub,
            msdp: MsdpStore::new(),
            ringlog: RwLock::new(RingLog::new()),
            triggers: RwLock::new(TriggerManager::new()),
            aliases: RwLock::new(AliasManager::new()),
            tickers: RwLock::new(TickerManager::new()),
            events: RwLock::new(EventManager::new()),
            queue: Mutex::new(CommandQueue::new()),
            modules: RwLock::new(ModuleManager::new()),
            data: RwLock::new(HashMap::new()),
            script: ScriptEngine::new()?,
            injectors: RwLock::new(HashMap::new()),
            msdp_hooks: RwLock::new(HashMap::new()),
            line_hooks: RwLock::new(HashMap::new()),
            reader_handle: Mutex::new(None),
            ticker_handle: Mutex::new(None),
        });
        session.script.install_api(&session)?;
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<String> {
        self.address.read().unwrap().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.birth.elapsed()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_password_mode(&self) -> bool {
        self.password_mode.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 回捲緩衝的目前內容
    pub fn content(&self) -> String {
        self.content.lock().unwrap().clone()
    }

    // === 連線與工作執行緒 ===

    /// 建立 TCP 連線，回傳給讀取執行緒用的串流複本。
    /// 呼叫端在模組載入與情境注入完成後再 [`spawn_reader`](Self::spawn_reader)。
    pub fn connect(&self, address: &str) -> Result<TcpStream, SessionError> {
        info!(session = %self.name, %address, "正在連線");

        let addrs: Vec<SocketAddr> = address
            .to_socket_addrs()
            .map_err(|e| SessionError::DnsResolutionFailed(e.to_string()))?
            .collect();
        let Some(addr) = addrs.first() else {
            return Err(SessionError::DnsResolutionFailed(format!(
                "無法解析主機: {address}"
            )));
        };

        let stream = TcpStream::connect_timeout(addr, self.config.connect_timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                SessionError::Timeout
            } else {
                SessionError::ConnectionFailed(e)
            }
        })?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;

        *self.socket.lock().unwrap() = Some(stream);
        *self.address.write().unwrap() = Some(address.to_string());
        self.connected.store(true, Ordering::SeqCst);
        self.write_failures.store(0, Ordering::SeqCst);

        info!(session = %self.name, %address, "已連線");
        Ok(reader)
    }

    /// 啟動讀取執行緒
    pub fn spawn_reader(self: &Arc<Self>, stream: TcpStream) {
        let session = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("reader-{}", self.name))
            .spawn(move || reader_loop(session, stream));
        match spawned {
            Ok(handle) => *self.reader_handle.lock().unwrap() = Some(handle),
            Err(err) => error!(session = %self.name, %err, "讀取執行緒啟動失敗"),
        }
    }

    /// 啟動計時執行緒
    pub fn spawn_ticker(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("ticker-{}", self.name))
            .spawn(move || ticker_loop(session));
        match spawned {
            Ok(handle) => *self.ticker_handle.lock().unwrap() = Some(handle),
            Err(err) => error!(session = %self.name, %err, "計時執行緒啟動失敗"),
        }
    }

    /// 發出取消信號：計時迴圈下一拍結束，讀取迴圈下一個期限結束
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 取消並等兩條執行緒返回；之後 Session 可安全丟棄
    pub fn close(&self) {
        self.cancel();
        if let Some(handle) = self.ticker_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(stream) = self.socket.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    // === 輸出與寫入 ===

    /// 附加文字到回捲緩衝並通知 UI
    pub fn output(&self, text: &str) {
        self.content.lock().unwrap().push_str(text);
        self.emit(UiMessage::Update {
            session: self.name.clone(),
            content: text.to_string(),
        });
    }

    /// 送出 UI 訊息。通道滿時阻塞（對 UI 的背壓）；UI 收端
    /// 已關閉時靜默丟棄。
    pub fn emit(&self, message: UiMessage) {
        let _ = self.sub.blocking_send(message);
    }

    /// 連線中時把命令加上 CR LF 寫出
    pub fn send_line(&self, command: &str) {
        if !self.is_connected() {
            debug!(session = %self.name, %command, "未連線，忽略送出");
            return;
        }
        let mut bytes = command.as_bytes().to_vec();
        bytes.extend_from_slice(LINE_TERMINATOR);
        self.send_bytes(&bytes);
    }

    /// 原始寫入。連續寫入失敗會把 Session 標為斷線。
    pub fn send_bytes(&self, bytes: &[u8]) {
        use std::io::Write;

        let mut guard = self.socket.lock().unwrap();
        let Some(stream) = guard.as_mut() else {
            return;
        };
        match stream.write_all(bytes).and_then(|_| stream.flush()) {
            Ok(()) => {
                self.write_failures.store(0, Ordering::SeqCst);
            }
            Err(err) => {
                warn!(session = %self.name, %err, "寫入失敗");
                let failures = self.write_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= 3 {
                    error!(session = %self.name, "連續寫入失敗，標記為斷線");
                    self.connected.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    // === 擴充資料 ===

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.read().unwrap().get(key).cloned()
    }

    pub fn set_data(&self, key: &str, value: Value) {
        self.data.write().unwrap().insert(key.to_string(), value);
    }

    // === 註冊表操作 ===

    pub fn add_trigger(&self, trigger: Trigger) {
        self.triggers.write().unwrap().add(trigger);
    }

    pub fn remove_trigger(&self, name: &str) {
        if self.triggers.write().unwrap().remove(name).is_none() {
            debug!(session = %self.name, name, "要移除的觸發器不存在");
        }
    }

    pub fn add_alias(&self, alias: Alias) {
        self.aliases.write().unwrap().add(alias);
    }

    pub fn remove_alias(&self, name: &str) {
        if self.aliases.write().unwrap().remove(name).is_none() {
            debug!(session = %self.name, name, "要移除的別名不存在");
        }
    }

    pub fn add_ticker(&self, record: TickerRecord) {
        self.tickers.write().unwrap().add(record);
    }

    pub fn remove_ticker(&self, name: &str) {
        self.tickers.write().unwrap().remove(name);
    }

    pub fn add_event(&self, event: Event) {
        self.events.write().unwrap().add(event);
    }

    /// 插入佇列項並回傳 id
    pub fn queue_add(&self, item: QueueItem) -> u64 {
        self.queue.lock().unwrap().add(item)
    }

    /// 取出下一個就緒的佇列項。
    /// 就緒判定在持有佇列鎖的情況下執行，判定器不得再操作佇列。
    pub fn queue_next_ready(self: &Arc<Self>) -> Option<QueueItem> {
        let mut queue = self.queue.lock().unwrap();
        queue.next_ready(self)
    }

    /// 依序送出所有就緒項，回傳送出的項目
    pub fn drain_queue(self: &Arc<Self>) -> Vec<QueueItem> {
        let mut dispatched = Vec::new();
        loop {
            let item = {
                let mut queue = self.queue.lock().unwrap();
                queue.next_ready(self)
            };
            match item {
                Some(item) => {
                    self.send_line(&item.command);
                    dispatched.push(item);
                }
                None => break,
            }
        }
        dispatched
    }

    // === 掛鉤與注入器 ===

    pub fn add_context_injector(&self, name: &str, injector: ContextInjector) {
        self.injectors
            .write()
            .unwrap()
            .insert(name.to_string(), injector);
    }

    pub fn add_msdp_hook(&self, name: &str, hook: MsdpHook) {
        self.msdp_hooks
            .write()
            .unwrap()
            .insert(name.to_string(), hook);
    }

    pub fn add_line_hook(&self, name: &str, hook: LineHook) {
        self.line_hooks
            .write()
            .unwrap()
            .insert(name.to_string(), hook);
    }

    /// 重跑所有情境注入器
    pub fn run_injectors(self: &Arc<Self>) {
        let injectors: Vec<(String, ContextInjector)> = {
            let guard = self.injectors.read().unwrap();
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if injectors.is_empty() {
            return;
        }

        Python::with_gil(|py| {
            for (name, injector) in injectors {
                if let Err(err) = injector(self, py) {
                    let detail = script::render_py_err(py, &err);
                    panic_log::log_panic(&format!("context injector {name}"), &detail, "");
                    self.output(&format!("\nScript error in context injector {name}: {err}\n"));
                }
            }
        });
    }

    // === 模組 ===

    pub fn register_module(&self, module: Module) {
        self.modules.write().unwrap().insert(module);
    }

    pub(crate) fn track_module_trigger(&self, module: &str, name: &str) {
        self.modules.write().unwrap().track_trigger(module, name);
    }

    pub(crate) fn track_module_alias(&self, module: &str, name: &str) {
        self.modules.write().unwrap().track_alias(module, name);
    }

    pub(crate) fn track_module_timer(&self, module: &str, name: &str) {
        self.modules.write().unwrap().track_timer(module, name);
    }

    pub(crate) fn untrack_module_timer(&self, module: &str, name: &str) {
        self.modules.write().unwrap().untrack_timer(module, name);
    }

    #[cfg(test)]
    pub(crate) fn register_module_for_tests(&self, name: &str) {
        self.register_module(Module::new(name, ""));
    }

    /// 啟用模組：它註冊的觸發器與別名一併啟用
    pub fn enable_module(&self, name: &str) -> Result<(), SessionError> {
        let (trigger_names, alias_names) = {
            let mut modules = self.modules.write().unwrap();
            let module = modules
                .get_mut(name)
                .ok_or_else(|| SessionError::UnknownModule(name.to_string()))?;
            if module.enabled {
                return Ok(());
            }
            module.enabled = true;
            (module.triggers.clone(), module.aliases.clone())
        };

        let mut triggers = self.triggers.write().unwrap();
        for trigger in &trigger_names {
            triggers.set_enabled(trigger, true);
        }
        drop(triggers);

        let mut aliases = self.aliases.write().unwrap();
        for alias in &alias_names {
            aliases.set_enabled(alias, true);
        }

        info!(session = %self.name, module = name, "已啟用模組");
        Ok(())
    }

    /// 停用模組：觸發器與別名停用，計時器整顆移除
    pub fn disable_module(&self, name: &str) -> Result<(), SessionError> {
        let (trigger_names, alias_names, timer_names) = {
            let mut modules = self.modules.write().unwrap();
            let module = modules
                .get_mut(name)
                .ok_or_else(|| SessionError::UnknownModule(name.to_string()))?;
            if !module.enabled {
                return Ok(());
            }
            module.enabled = false;
            (
                module.triggers.clone(),
                module.aliases.clone(),
                std::mem::take(&mut module.timers),
            )
        };

        let mut triggers = self.triggers.write().unwrap();
        for trigger in &trigger_names {
            triggers.set_enabled(trigger, false);
        }
        drop(triggers);

        let mut aliases = self.aliases.write().unwrap();
        for alias in &alias_names {
            aliases.set_enabled(alias, false);
        }
        drop(aliases);

        let mut tickers = self.tickers.write().unwrap();
        for timer in &timer_names {
            tickers.remove(timer);
        }

        info!(session = %self.name, module = name, "已停用模組");
        Ok(())
    }

    // === 環狀日誌視圖 ===

    pub fn ringlog_current_index(&self) -> usize {
        self.ringlog.read().unwrap().current_index()
    }

    pub fn ringlog_get(&self, index: usize) -> Option<RingEntry> {
        self.ringlog.read().unwrap().get(index).cloned()
    }

    pub fn ringlog_range(&self, start: usize, end: usize) -> Vec<RingEntry> {
        self.ringlog.read().unwrap().range(start, end)
    }

    // === 行處理管線 ===

    /// 一行定案：寫環狀日誌 → 掃觸發器 → 回捲/UI →（提示則點燃
    /// `core.prompt`）→ 行掛鉤 → 情境注入器
    pub(crate) fn finalize_line(self: &Arc<Self>, bytes: &[u8], prompt: bool) {
        let raw = String::from_utf8_lossy(bytes).into_owned();
        let stripped = ansi::strip_ansi(&raw);

        self.ringlog.write().unwrap().append_tagged(
            epoch_ns(),
            prompt.then(|| "prompt".to_string()),
            raw.clone(),
            stripped.clone(),
        );

        self.run_triggers(&raw, &stripped);

        {
            let mut content = self.content.lock().unwrap();
            content.push_str(&raw);
            content.push('\n');
        }
        self.emit(UiMessage::Update {
            session: self.name.clone(),
            content: format!("{raw}\n"),
        });

        if prompt {
            self.fire_event("core.prompt");
        }

        self.run_line_hooks(&raw, &stripped);
        self.run_injectors();
    }

    fn run_triggers(self: &Arc<Self>, raw: &str, stripped: &str) {
        let fired = { self.triggers.read().unwrap().matches(raw, stripped) };
        if fired.is_empty() {
            return;
        }
        {
            let mut triggers = self.triggers.write().unwrap();
            for (name, _, _) in &fired {
                triggers.bump(name);
            }
        }
        for (name, handler, m) in fired {
            match handler {
                TriggerHandler::Native(f) => {
                    self.run_native(&format!("trigger {name}"), || f(self, &m));
                }
                TriggerHandler::Script(f) => {
                    self.call_script(&format!("trigger {name}"), |py| {
                        let caps = PyList::new(py, &m.captures)?;
                        f.call1(py, (m.ansi_line.as_str(), m.line.as_str(), caps))
                            .map(|_| ())
                    });
                }
            }
        }
    }

    fn run_line_hooks(self: &Arc<Self>, raw: &str, stripped: &str) {
        let hooks: Vec<(String, LineHook)> = {
            let guard = self.line_hooks.read().unwrap();
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (name, hook) in hooks {
            self.run_native(&format!("line hook {name}"), || hook(self, raw, stripped));
        }
    }

    /// 點燃事件字串上的所有監聽器
    pub fn fire_event(self: &Arc<Self>, event: &str) {
        let listeners = { self.events.read().unwrap().listeners(event) };
        if listeners.is_empty() {
            return;
        }
        {
            let mut events = self.events.write().unwrap();
            for (name, _) in &listeners {
                events.bump(name);
            }
        }
        let data = EventData::default();
        for (name, handler) in listeners {
            self.run_native(&format!("event {name}"), || handler(self, &data));
        }
    }

    /// 嘗試用別名吃掉一筆輸入；命中時呼叫處理器並回報 true
    pub fn match_alias(self: &Arc<Self>, input: &str) -> bool {
        let matched = { self.aliases.read().unwrap().find_match(input) };
        let Some((name, handler, captures)) = matched else {
            return false;
        };
        self.aliases.write().unwrap().bump(&name);

        match handler {
            AliasHandler::Native(f) => {
                self.run_native(&format!("alias {name}"), || f(self, &captures));
            }
            AliasHandler::Script(f) => {
                self.call_script(&format!("alias {name}"), |py| {
                    let caps = PyList::new(py, &captures)?;
                    f.call1(py, (caps,)).map(|_| ())
                });
            }
        }
        true
    }

    // === MSDP ===

    /// 處理一個完整的 MSDP 框架。解碼失敗只記錄並丟棄該框架。
    pub(crate) fn handle_msdp_frame(self: &Arc<Self>, frame: &[u8]) {
        let update = match msdp::decoder::decode(frame) {
            Ok(update) => update,
            Err(err) => {
                error!(session = %self.name, %err, "MSDP 框架格式錯誤，丟棄");
                return;
            }
        };
        if update.is_empty() {
            return;
        }

        self.msdp.merge(&update);

        // 伺服器回了可回報變數清單：立刻請求全部回報
        if let Some(MsdpValue::Array(vars)) = update.get("REPORTABLE_VARIABLES") {
            let names: Vec<&str> = vars
                .iter()
                .filter_map(|v| match v {
                    MsdpValue::String(s) if !s.is_empty() => Some(s.as_str()),
                    _ => None,
                })
                .collect();
            if !names.is_empty() {
                info!(session = %self.name, count = names.len(), "送出 MSDP REPORT");
                self.send_bytes(&msdp::encoder::report_message(names));
            }
        }

        let hooks: Vec<(String, MsdpHook)> = {
            let guard = self.msdp_hooks.read().unwrap();
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (name, hook) in hooks {
            self.run_native(&format!("msdp hook {name}"), || hook(self, &update));
        }

        self.run_injectors();
    }

    // === 隔離屏障 ===

    /// 原生處理器的恐慌屏障：記錄到 panic.log、回報到輸出，
    /// 呼叫端的迴圈繼續活著
    pub(crate) fn run_native<F: FnOnce()>(&self, location: &str, f: F) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        if let Err(payload) = result {
            let value = panic_log::describe_panic(payload.as_ref());
            let backtrace = std::backtrace::Backtrace::force_capture().to_string();
            panic_log::log_panic(location, &value, &backtrace);
            self.output(&format!(
                "\nPANIC in {location}: {value}\n(details appended to panic.log)\n"
            ));
        }
    }

    /// 腳本呼叫的隔離屏障：Python 例外記錄並回報，不外傳
    pub(crate) fn call_script<F>(&self, location: &str, f: F)
    where
        F: FnOnce(Python<'_>) -> PyResult<()>,
    {
        Python::with_gil(|py| {
            if let Err(err) = f(py) {
                let detail = script::render_py_err(py, &err);
                panic_log::log_panic(location, &detail, "");
                self.output(&format!(
                    "\nScript error in {location}: {err}\n(details appended to panic.log)\n"
                ));
            }
        });
    }

    // === Telnet 事件 ===

    fn handle_telnet_event(self: &Arc<Self>, event: TelnetEvent, negotiator: &mut Negotiator) {
        match event {
            TelnetEvent::Line(bytes) => self.finalize_line(&bytes, false),
            TelnetEvent::Prompt(bytes) => self.finalize_line(&bytes, true),
            TelnetEvent::Negotiation(cmd, opt) => {
                let outcome = negotiator.on_negotiation(cmd, opt);
                for reply in &outcome.replies {
                    self.send_bytes(reply);
                }
                if let Some(enabled) = outcome.password_mode {
                    let was = self.password_mode.swap(enabled, Ordering::SeqCst);
                    if was != enabled {
                        info!(session = %self.name, enabled, "密碼模式切換");
                        self.emit(UiMessage::PasswordMode {
                            session: self.name.clone(),
                            enabled,
                        });
                    }
                }
            }
            TelnetEvent::Subnegotiation(payload) => match payload.first() {
                Some(&msdp::MSDP) => {
                    // 解碼器吃的是完整外封框架
                    let mut frame = vec![
                        crate::telnet::IAC,
                        crate::telnet::TelnetCommand::Sb as u8,
                    ];
                    frame.extend_from_slice(&payload);
                    frame.push(crate::telnet::IAC);
                    frame.push(crate::telnet::TelnetCommand::Se as u8);
                    self.handle_msdp_frame(&frame);
                }
                Some(b) if *b == TelnetOption::TerminalType.as_byte() => {
                    if let Some(reply) = negotiator.on_terminal_type(&payload) {
                        self.send_bytes(&reply);
                    }
                }
                other => {
                    debug!(session = %self.name, ?other, "忽略未處理的子協商");
                }
            },
            TelnetEvent::UnknownIac(byte) => {
                debug!(session = %self.name, byte, "未知的 IAC 命令");
            }
        }
    }
}

/// 讀取迴圈：阻塞讀取 + 短讀取期限。期限到而行緩衝非空時，
/// 把手上的內容沖洗成一行（伺服器既不送 LF 也不送 GA 的場合）。
fn reader_loop(session: Arc<Session>, stream: TcpStream) {
    if let Err(err) = stream.set_read_timeout(Some(session.config.idle_flush)) {
        error!(session = %session.name, %err, "無法設定讀取期限");
    }

    let mut stream = stream;
    let mut machine = TelnetMachine::new();
    let mut negotiator = Negotiator::new();
    let mut buffer = vec![0u8; session.config.read_buffer_size];

    loop {
        if session.is_cancelled() {
            break;
        }
        match stream.read(&mut buffer) {
            Ok(0) => {
                info!(session = %session.name, "伺服器關閉連線");
                break;
            }
            Ok(n) => {
                for event in machine.feed(&buffer[..n]) {
                    session.handle_telnet_event(event, &mut negotiator);
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                if let Some(partial) = machine.take_partial() {
                    session.finalize_line(&partial, false);
                }
            }
            Err(err) => {
                error!(session = %session.name, %err, "讀取錯誤");
                break;
            }
        }
    }

    session.connected.store(false, Ordering::SeqCst);
    let _ = stream.shutdown(Shutdown::Both);
    session.emit(UiMessage::Disconnected {
        session: session.name().to_string(),
    });
    debug!(session = %session.name, "讀取執行緒結束");
}

/// 計時迴圈：50 毫秒一拍。到期者執行處理器或送出字面命令；
/// 處理器的恐慌與例外由屏障吸收，迴圈不死。
fn ticker_loop(session: Arc<Session>) {
    debug!(session = %session.name, "計時執行緒啟動");
    loop {
        if session.is_cancelled() {
            break;
        }

        let due = { session.tickers.read().unwrap().due(Instant::now()) };
        for (name, fire) in due {
            match fire {
                TickerFire::Handler(TickerHandler::Native(f)) => {
                    session.run_native(&format!("ticker {name}"), || f(&session));
                }
                TickerFire::Handler(TickerHandler::Script(f)) => {
                    session.call_script(&format!("ticker {name}"), |py| {
                        f.call0(py).map(|_| ())
                    });
                }
                TickerFire::Command(command) if !command.is_empty() => {
                    session.send_line(&command);
                }
                TickerFire::Command(_) => {}
            }
            session.tickers.write().unwrap().settle(&name, Instant::now());
        }

        std::thread::sleep(Duration::from_millis(50));
    }
    debug!(session = %session.name, "計時執行緒結束");
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// UI 收端直接丟棄的測試 Session
    pub fn bare_session(name: &str) -> Arc<Session> {
        let (tx, _rx) = mpsc::channel(50);
        Session::new(name, tx).unwrap()
    }

    /// 保留 UI 收端的測試 Session
    pub fn session_with_ui(name: &str) -> (Arc<Session>, mpsc::Receiver<UiMessage>) {
        let (tx, rx) = mpsc::channel(50);
        (Session::new(name, tx).unwrap(), rx)
    }
}
