//! Session 管理
//!
//! SessionHandler 擁有全部 Session、追蹤使用中的那一個，並持有
//! 唯一一條 UI 訊息通道。啟動時建立預設（未連線）的 "zif"
//! Session；其餘依使用者要求建立。Session 表只由 UI 執行緒改動。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::commands;
use super::messages::UiMessage;
use super::{Session, SessionError};
use crate::paths;
use crate::script;
use crate::telnet::LINE_TERMINATOR;

/// UI 通道容量：滿了就擋住生產者，形成背壓
const UI_CHANNEL_CAPACITY: usize = 50;

/// 預設 Session 名稱
pub const DEFAULT_SESSION: &str = "zif";

/// 全部 Session 的持有者
pub struct SessionHandler {
    /// 使用中的 Session 名稱
    pub active: String,
    sessions: HashMap<String, Arc<Session>>,
    sub: mpsc::Sender<UiMessage>,
}

fn motd() -> String {
    concat!(
        "\n\x1b[38;5;141m",
        "  ┌┬┐┬ ┬┌┬┐┌┬┐┬ ┬─┐ ┬\n",
        "  │││││ │ ││││││ │┌┴┬┘\n",
        "  ┴ ┴└─┘─┴┘┴ ┴└─┘┴ └─\x1b[0m\n",
        "\n  multi-session MUD client\n\n"
    )
    .to_string()
}

impl SessionHandler {
    /// 建立管理器與預設 Session，回傳 UI 訊息收端
    pub fn new() -> Result<(Self, mpsc::Receiver<UiMessage>), SessionError> {
        let (tx, rx) = mpsc::channel(UI_CHANNEL_CAPACITY);

        let session = Session::new(DEFAULT_SESSION, tx.clone())?;
        session.output(&motd());
        session.spawn_ticker();

        if let Err(err) = paths::ensure_config_dirs() {
            warn!(%err, "無法建立設定目錄");
        }
        if let Err(err) = script::load_global_modules(&session) {
            warn!(%err, "全域模組載入失敗");
        }
        if let Err(err) = script::load_session_modules(&session, DEFAULT_SESSION) {
            warn!(%err, "Session 模組載入失敗");
        }
        session.run_injectors();

        let mut sessions = HashMap::new();
        sessions.insert(DEFAULT_SESSION.to_string(), session);

        Ok((
            Self {
                active: DEFAULT_SESSION.to_string(),
                sessions,
                sub: tx,
            },
            rx,
        ))
    }

    /// 使用中的 Session
    pub fn active_session(&self) -> Option<Arc<Session>> {
        self.sessions.get(&self.active).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.get(name).cloned()
    }

    pub fn session_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 切換使用中的 Session
    pub fn switch_to(&mut self, name: &str) -> bool {
        if !self.sessions.contains_key(name) {
            return false;
        }
        self.active = name.to_string();
        let _ = self.sub.blocking_send(UiMessage::SessionChanged {
            session: name.to_string(),
        });
        true
    }

    /// 建立並連線一個新 Session
    ///
    /// 名稱不可含空白；位址必須是 host:port。連線失敗時不留下
    /// 任何痕跡。建立流程：連線 → 計時執行緒 → 模組載入 →
    /// 情境注入 → 最後才啟動讀取執行緒。
    pub fn add_session(&mut self, name: &str, address: &str) -> Result<(), SessionError> {
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(SessionError::InvalidName(name.to_string()));
        }
        if address.is_empty() || !address.contains(':') {
            return Err(SessionError::InvalidAddress(address.to_string()));
        }
        if self.sessions.contains_key(name) {
            return Err(SessionError::DuplicateName(name.to_string()));
        }

        if let Some(active) = self.active_session() {
            active.output(&format!("attempt to connect to: {address}\n"));
        }

        let session = Session::new(name, self.sub.clone())?;
        let reader = match session.connect(address) {
            Ok(reader) => reader,
            Err(err) => {
                if let Some(active) = self.active_session() {
                    active.output(&format!("Failed to connect to {address}: {err}\n"));
                }
                return Err(err);
            }
        };

        self.sessions.insert(name.to_string(), Arc::clone(&session));
        session.spawn_ticker();

        if let Err(err) = paths::ensure_config_dirs() {
            warn!(%err, "無法建立設定目錄");
        }
        if let Err(err) = script::load_global_modules(&session) {
            warn!(%err, "全域模組載入失敗");
        }
        if let Err(err) = script::load_session_modules(&session, name) {
            warn!(%err, "Session 模組載入失敗");
        }

        session.run_injectors();
        session.spawn_reader(reader);
        Ok(())
    }

    /// 關閉並移除一個 Session
    pub fn close_session(&mut self, name: &str) -> bool {
        let Some(session) = self.sessions.remove(name) else {
            return false;
        };
        session.close();
        if self.active == name {
            self.active = if self.sessions.contains_key(DEFAULT_SESSION) {
                DEFAULT_SESSION.to_string()
            } else {
                self.sessions.keys().next().cloned().unwrap_or_default()
            };
        }
        true
    }

    /// 使用者輸入一行。別名吃掉就結束；`#` 開頭永遠是內部命令、
    /// 不給別名比對；其餘（非密碼模式下亮白回顯後）寫往連線。
    pub fn handle_input(&mut self, text: &str) {
        let Some(session) = self.active_session() else {
            return;
        };

        if text.is_empty() {
            if session.is_connected() {
                session.send_bytes(LINE_TERMINATOR);
            }
            return;
        }

        if !session.is_password_mode() {
            session.output(&format!("\x1b[1;37m{text}\x1b[0m\n"));
        }

        if text.starts_with('#') {
            commands::dispatch(self, &session, text);
            return;
        }

        if session.match_alias(text) {
            return;
        }

        session.send_line(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{Alias, AliasHandler};
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    fn new_handler() -> SessionHandler {
        let (handler, rx) = SessionHandler::new().unwrap();
        drop(rx); // 測試不驗 UI 訊息流，丟棄收端讓送端不阻塞
        handler
    }

    fn read_available(stream: &mut TcpStream, wait: Duration) -> Vec<u8> {
        stream.set_read_timeout(Some(wait)).unwrap();
        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        collected
    }

    #[test]
    fn test_default_session_exists_disconnected() {
        let handler = new_handler();
        assert_eq!(handler.active, "zif");
        let session = handler.active_session().unwrap();
        assert!(!session.is_connected());
        assert!(session.content().contains("multi-session MUD client"));
    }

    #[test]
    fn test_add_session_validations() {
        let mut handler = new_handler();
        assert!(matches!(
            handler.add_session("", "h:1"),
            Err(SessionError::EmptyName)
        ));
        assert!(matches!(
            handler.add_session("bad name", "h:1"),
            Err(SessionError::InvalidName(_))
        ));
        assert!(matches!(
            handler.add_session("ok", "noport"),
            Err(SessionError::InvalidAddress(_))
        ));
        assert!(matches!(
            handler.add_session("zif", "h:1"),
            Err(SessionError::DuplicateName(_))
        ));
        // 失敗的建立不留下 Session
        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn test_add_session_connect_failure_cleans_up() {
        let mut handler = new_handler();
        // 先佔一個埠再關掉，確保沒人在聽
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = handler.add_session("dead", &format!("127.0.0.1:{port}"));
        assert!(result.is_err());
        assert!(handler.get("dead").is_none());
    }

    #[test]
    fn test_alias_consumes_input() {
        // 別名吃掉輸入，連線收到展開後的命令，原文不上線
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut handler = new_handler();
        handler.add_session("t", &addr).unwrap();
        handler.switch_to("t");
        let (mut server, _) = listener.accept().unwrap();

        let session = handler.get("t").unwrap();
        session.add_alias(
            Alias::new(
                "sm",
                "^sm$",
                AliasHandler::Native(Arc::new(|s: &Arc<Session>, _caps: &[String]| {
                    s.send_line("smile");
                })),
            )
            .unwrap(),
        );

        handler.handle_input("sm");
        let received = read_available(&mut server, Duration::from_millis(300));
        assert_eq!(received, b"smile\r\n"); // 原輸入 "sm" 沒有送出
        assert_eq!(session.aliases.read().unwrap().get("sm").unwrap().count, 1);

        handler.handle_input("wave");
        let received = read_available(&mut server, Duration::from_millis(300));
        assert_eq!(received, b"wave\r\n");

        handler.close_session("t");
    }

    #[test]
    fn test_hash_input_never_hits_aliases() {
        let mut handler = new_handler();
        let session = handler.active_session().unwrap();
        session.add_alias(
            Alias::new(
                "trap",
                "^#he.*$",
                AliasHandler::Native(Arc::new(|_: &Arc<Session>, _: &[String]| {
                    panic!("alias must not see # commands");
                })),
            )
            .unwrap(),
        );

        handler.handle_input("#help");
        assert_eq!(session.aliases.read().unwrap().get("trap").unwrap().count, 0);
        assert!(session.content().contains("Commands:"));
    }

    #[test]
    fn test_empty_input_sends_bare_newline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut handler = new_handler();
        handler.add_session("t", &addr).unwrap();
        handler.switch_to("t");
        let (mut server, _) = listener.accept().unwrap();

        handler.handle_input("");
        let received = read_available(&mut server, Duration::from_millis(300));
        assert_eq!(received, b"\r\n");
        handler.close_session("t");
    }

    #[test]
    fn test_local_echo_bright_white() {
        let mut handler = new_handler();
        handler.handle_input("north");
        let content = handler.active_session().unwrap().content();
        assert!(content.contains("\x1b[1;37mnorth\x1b[0m\n"));
    }

    #[test]
    fn test_switch_to_unknown_fails() {
        let mut handler = new_handler();
        assert!(!handler.switch_to("ghost"));
        assert_eq!(handler.active, "zif");
    }

    #[test]
    fn test_close_session_restores_default_active() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut handler = new_handler();
        handler.add_session("t", &addr).unwrap();
        let _accepted = listener.accept().unwrap();
        handler.switch_to("t");
        assert_eq!(handler.active, "t");

        assert!(handler.close_session("t"));
        assert_eq!(handler.active, "zif");
        assert!(handler.get("t").is_none());
    }
}
