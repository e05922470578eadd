//! Telnet 位元組流狀態機
//!
//! 逐位元組消化連線輸入，把頻內文字與 Telnet 協商分離：
//! 文字累積成行（LF 結尾）或提示（GA 結尾），IAC 序列完整消化後
//! 才會產生事件，絕不把半截跳脫序列流向下游。

use super::protocol::{TelnetCommand, TelnetOption, IAC};

/// 狀態機產生的事件
#[derive(Debug, Clone, PartialEq)]
pub enum TelnetEvent {
    /// 完整的一行（已去除行尾 CR/LF）
    Line(Vec<u8>),
    /// GA 結尾的提示行（MUD 提示通常沒有換行）
    Prompt(Vec<u8>),
    /// 協商命令 (WILL/WONT/DO/DONT + 選項)
    Negotiation(TelnetCommand, TelnetOption),
    /// 子協商負載（第一個位元組為選項碼，IAC IAC 已還原）
    Subnegotiation(Vec<u8>),
    /// IAC 之後出現無法處理的命令位元組
    UnknownIac(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    Iac,
    /// 已收到 WILL/WONT/DO/DONT，等待選項位元組
    Option(TelnetCommand),
    Sb,
    SbIac,
}

/// 增量式 Telnet 解譯器
///
/// 緩衝區跨 `feed` 呼叫保留，半行或半截 IAC 序列會等到後續資料到齊。
#[derive(Debug)]
pub struct TelnetMachine {
    state: State,
    line: Vec<u8>,
    sb: Vec<u8>,
}

impl TelnetMachine {
    pub fn new() -> Self {
        Self {
            state: State::Text,
            line: Vec::new(),
            sb: Vec::new(),
        }
    }

    /// 餵入一段位元組，回傳期間完成的事件
    pub fn feed(&mut self, input: &[u8]) -> Vec<TelnetEvent> {
        let mut events = Vec::new();

        for &byte in input {
            match self.state {
                State::Text => {
                    if byte == IAC {
                        self.state = State::Iac;
                    } else if byte == b'\n' {
                        events.push(TelnetEvent::Line(self.take_line()));
                    } else {
                        self.line.push(byte);
                    }
                }
                State::Iac => match byte {
                    IAC => {
                        // IAC IAC = 跳脫後的字面 0xFF
                        self.line.push(IAC);
                        self.state = State::Text;
                    }
                    b if b == TelnetCommand::GoAhead as u8 => {
                        events.push(TelnetEvent::Prompt(self.take_line()));
                        self.state = State::Text;
                    }
                    b if b == TelnetCommand::Sb as u8 => {
                        self.sb.clear();
                        self.state = State::Sb;
                    }
                    b => {
                        match TelnetCommand::from_byte(b) {
                            Some(
                                cmd @ (TelnetCommand::Will
                                | TelnetCommand::Wont
                                | TelnetCommand::Do
                                | TelnetCommand::Dont),
                            ) => {
                                self.state = State::Option(cmd);
                            }
                            _ => {
                                events.push(TelnetEvent::UnknownIac(b));
                                self.state = State::Text;
                            }
                        }
                    }
                },
                State::Option(cmd) => {
                    events.push(TelnetEvent::Negotiation(cmd, TelnetOption::from_byte(byte)));
                    self.state = State::Text;
                }
                State::Sb => {
                    if byte == IAC {
                        self.state = State::SbIac;
                    } else {
                        self.sb.push(byte);
                    }
                }
                State::SbIac => {
                    if byte == TelnetCommand::Se as u8 {
                        events.push(TelnetEvent::Subnegotiation(std::mem::take(&mut self.sb)));
                        self.state = State::Text;
                    } else if byte == IAC {
                        // 子協商內的跳脫 0xFF
                        self.sb.push(IAC);
                        self.state = State::Sb;
                    } else {
                        // 不合規的序列，保守地原樣收進負載
                        self.sb.push(IAC);
                        self.sb.push(byte);
                        self.state = State::Sb;
                    }
                }
            }
        }

        events
    }

    /// 取走閒置未完成的行（伺服器既不送 LF 也不送 GA 時的逾時沖洗）
    ///
    /// IAC 序列進行到一半時回傳 `None`，絕不輸出半截序列。
    pub fn take_partial(&mut self) -> Option<Vec<u8>> {
        if self.state == State::Text && !self.line.is_empty() {
            Some(self.take_line())
        } else {
            None
        }
    }

    /// 目前是否累積了未完成的行
    pub fn has_partial(&self) -> bool {
        !self.line.is_empty()
    }

    fn take_line(&mut self) -> Vec<u8> {
        let mut line = std::mem::take(&mut self.line);
        while matches!(line.last(), Some(b'\r') | Some(b'\n')) {
            line.pop();
        }
        line
    }
}

impl Default for TelnetMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(events: &[TelnetEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TelnetEvent::Line(b) | TelnetEvent::Prompt(b) => {
                    Some(String::from_utf8_lossy(b).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_lines() {
        let mut machine = TelnetMachine::new();
        let events = machine.feed(&[0x41, 0x42, 0x43, 0x0A, 0x44, 0x45, 0x0A]);
        assert_eq!(lines_of(&events), vec!["ABC", "DE"]);
    }

    #[test]
    fn test_transparency_without_iac() {
        // 無 IAC 的輸入就是按 LF 切割、去尾端 CR
        let mut machine = TelnetMachine::new();
        let events = machine.feed(b"one\r\ntwo\nthree\r\n");
        assert_eq!(lines_of(&events), vec!["one", "two", "three"]);
        assert!(!machine.has_partial());
    }

    #[test]
    fn test_escaped_iac_in_text() {
        // 線路上的 FF FF 在下游呈現為單一 0xFF
        let mut machine = TelnetMachine::new();
        let events = machine.feed(&[b'A', IAC, IAC, b'B', b'\n']);
        assert_eq!(events, vec![TelnetEvent::Line(vec![b'A', 0xFF, b'B'])]);
    }

    #[test]
    fn test_prompt_on_go_ahead() {
        let mut machine = TelnetMachine::new();
        let events = machine.feed(&[0x50, 0x72, 0x6F, 0x6D, 0x70, 0x74, 0x3E, 0xFF, 0xF9]);
        assert_eq!(events, vec![TelnetEvent::Prompt(b"Prompt>".to_vec())]);
    }

    #[test]
    fn test_negotiation_events() {
        let mut machine = TelnetMachine::new();
        let events = machine.feed(&[IAC, 0xFB, 0x45, IAC, 0xFD, 0x18]);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Negotiation(TelnetCommand::Will, TelnetOption::Msdp),
                TelnetEvent::Negotiation(TelnetCommand::Do, TelnetOption::TerminalType),
            ]
        );
    }

    #[test]
    fn test_negotiation_split_across_feeds() {
        // IAC 序列跨讀取邊界仍必須原子地消化
        let mut machine = TelnetMachine::new();
        assert!(machine.feed(&[IAC]).is_empty());
        assert!(machine.feed(&[0xFB]).is_empty());
        let events = machine.feed(&[0x01]);
        assert_eq!(
            events,
            vec![TelnetEvent::Negotiation(TelnetCommand::Will, TelnetOption::Echo)]
        );
    }

    #[test]
    fn test_subnegotiation_payload() {
        let mut machine = TelnetMachine::new();
        let mut input = vec![IAC, 0xFA, 0x45, 0x01];
        input.extend_from_slice(b"ROOM_VNUM");
        input.push(0x02);
        input.extend_from_slice(b"2347");
        input.extend_from_slice(&[IAC, 0xF0]);

        let events = machine.feed(&input);
        assert_eq!(events.len(), 1);
        match &events[0] {
            TelnetEvent::Subnegotiation(payload) => {
                assert_eq!(payload[0], 0x45);
                assert!(payload.ends_with(b"2347"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_escaped_iac_inside_subnegotiation() {
        // SB 負載內的 FF FF 要還原為單一 0xFF
        let mut machine = TelnetMachine::new();
        let input = [IAC, 0xFA, 0x45, b'x', IAC, IAC, b'y', IAC, 0xF0];
        let events = machine.feed(&input);
        assert_eq!(
            events,
            vec![TelnetEvent::Subnegotiation(vec![0x45, b'x', 0xFF, b'y'])]
        );
    }

    #[test]
    fn test_unknown_iac_command() {
        let mut machine = TelnetMachine::new();
        let events = machine.feed(&[IAC, 241, b'a', b'\n']); // NOP
        assert_eq!(
            events,
            vec![TelnetEvent::UnknownIac(241), TelnetEvent::Line(vec![b'a'])]
        );
    }

    #[test]
    fn test_take_partial() {
        let mut machine = TelnetMachine::new();
        machine.feed(b"no newline yet");
        assert_eq!(machine.take_partial(), Some(b"no newline yet".to_vec()));
        assert_eq!(machine.take_partial(), None);
    }

    #[test]
    fn test_partial_withheld_during_iac() {
        // 半截 IAC 序列時不可沖洗
        let mut machine = TelnetMachine::new();
        machine.feed(b"abc");
        machine.feed(&[IAC]);
        assert_eq!(machine.take_partial(), None);
        let events = machine.feed(&[IAC, b'\n']);
        assert_eq!(events, vec![TelnetEvent::Line(vec![b'a', b'b', b'c', 0xFF])]);
    }
}
