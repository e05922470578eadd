//! Session → UI 的訊息
//!
//! 單一有界通道（容量 50）承載所有 Session 發往 UI 的訊息；
//! 通道滿時生產者（讀取/計時執行緒）被擋下，形成對 UI 的背壓。

/// UI 訊息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
    /// 新的輸出內容
    Update { session: String, content: String },
    /// 使用中的 Session 改變
    SessionChanged { session: String },
    /// 進入/離開密碼模式（輸入列應切換遮罩）
    PasswordMode { session: String, enabled: bool },
    /// 連線已中斷
    Disconnected { session: String },
    /// 版面指令（射後不理，由 UI 解讀）
    Layout {
        session: String,
        command: String,
        args: Vec<String>,
    },
}
