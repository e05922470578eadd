//! MUD 客戶端核心函式庫
//!
//! 提供多會話 MUD 客戶端的核心功能：
//! - `telnet`: Telnet 位元組流解譯與選項協商
//! - `msdp`: MSDP 帶外資料的解碼、編碼與變數容器
//! - `ringlog`: 最近輸出行的環狀日誌
//! - `trigger` / `alias`: 觸發器與別名引擎
//! - `ticker` / `queue` / `event`: 計時器、優先級命令佇列、事件掛鉤
//! - `script`: Python 腳本引擎與模組載入
//! - `session`: Session 與 SessionHandler 的協調

pub mod alias;
pub mod ansi;
pub mod event;
pub mod msdp;
pub mod panic_log;
pub mod paths;
pub mod queue;
pub mod ringlog;
pub mod script;
pub mod session;
pub mod telnet;
pub mod ticker;
pub mod trigger;

pub use alias::{Alias, AliasHandler, AliasManager};
pub use event::{Event, EventData, EventManager};
pub use msdp::store::MsdpStore;
pub use msdp::MsdpValue;
pub use queue::{CommandQueue, QueueItem};
pub use ringlog::{RingEntry, RingLog};
pub use script::{ScriptEngine, ScriptError};
pub use session::{Session, SessionError, SessionHandler, UiMessage};
pub use telnet::{TelnetEvent, TelnetMachine};
pub use ticker::{TickerHandler, TickerManager, TickerRecord};
pub use trigger::{Trigger, TriggerHandler, TriggerManager, TriggerMatch};
