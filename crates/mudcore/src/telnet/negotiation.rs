//! Telnet 選項協商
//!
//! 針對 ECHO、MSDP、TERMINAL-TYPE 的回應策略；其餘協商只記錄、不回應。

use tracing::debug;

use super::protocol::{TelnetCommand, TelnetOption, IAC, TERM_TYPE_IS, TERM_TYPE_SEND};
use crate::msdp;

/// 終端型別輪替序列：產品名稱 → 256 色識別 → MTTS 位元圖
const TERMINAL_TYPES: [&str; 3] = ["mudmux", "XTERM-256COLOR", "MTTS 2831"];

/// 一次協商的處理結果
#[derive(Debug, Default, PartialEq)]
pub struct NegotiationOutcome {
    /// 要寫回伺服器的回應（依序送出）
    pub replies: Vec<Vec<u8>>,
    /// 密碼模式變更（`Some(true)` 進入、`Some(false)` 離開）
    pub password_mode: Option<bool>,
}

/// 每條連線一份的協商狀態
///
/// ECHO 協商帶閂鎖：伺服器重複提出 WILL ECHO 不會再次觸發回應，
/// 避免與迴音回應互相打轉。
#[derive(Debug, Default)]
pub struct Negotiator {
    echo_negotiated: bool,
    term_type_index: usize,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 處理一筆 WILL/WONT/DO/DONT 協商
    pub fn on_negotiation(&mut self, cmd: TelnetCommand, opt: TelnetOption) -> NegotiationOutcome {
        let mut outcome = NegotiationOutcome::default();

        match (cmd, opt) {
            (TelnetCommand::Will, TelnetOption::Echo) => {
                if !self.echo_negotiated {
                    self.echo_negotiated = true;
                    outcome
                        .replies
                        .push(vec![IAC, TelnetCommand::Do as u8, TelnetOption::Echo.as_byte()]);
                    outcome.password_mode = Some(true);
                } else {
                    debug!("重複的 WILL ECHO，閂鎖已生效，略過");
                    outcome.password_mode = Some(true);
                }
            }
            (TelnetCommand::Wont, TelnetOption::Echo) => {
                // 不需回應：伺服器恢復迴音即解除遮罩
                self.echo_negotiated = false;
                outcome.password_mode = Some(false);
            }
            (TelnetCommand::Will, TelnetOption::Msdp) => {
                outcome
                    .replies
                    .push(vec![IAC, TelnetCommand::Do as u8, TelnetOption::Msdp.as_byte()]);
                outcome
                    .replies
                    .push(msdp::encoder::list_message("REPORTABLE_VARIABLES"));
            }
            (TelnetCommand::Do, TelnetOption::TerminalType) => {
                outcome.replies.push(vec![
                    IAC,
                    TelnetCommand::Will as u8,
                    TelnetOption::TerminalType.as_byte(),
                ]);
            }
            (cmd, opt) => {
                // 未處理的協商只記錄，不做任何承諾
                debug!(?cmd, ?opt, "未處理的 Telnet 協商");
            }
        }

        outcome
    }

    /// 處理 TERMINAL-TYPE 子協商：每收到一次 SEND 就輪替下一個名稱
    pub fn on_terminal_type(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.get(1) != Some(&TERM_TYPE_SEND) {
            debug!(?payload, "非 SEND 的 TERMINAL-TYPE 子協商");
            return None;
        }

        let name = TERMINAL_TYPES[self.term_type_index.min(TERMINAL_TYPES.len() - 1)];
        if self.term_type_index < TERMINAL_TYPES.len() - 1 {
            self.term_type_index += 1;
        }

        let mut reply = vec![IAC, TelnetCommand::Sb as u8, TelnetOption::TerminalType.as_byte(), TERM_TYPE_IS];
        reply.extend_from_slice(name.as_bytes());
        reply.push(IAC);
        reply.push(TelnetCommand::Se as u8);
        Some(reply)
    }
}
