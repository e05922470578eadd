//! Telnet 協定常數
//!
//! 實作 RFC 854 Telnet 協定的基本命令與本客戶端關心的選項

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;

/// 送往伺服器的標準行尾 (RFC 854): CR LF
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// TERMINAL-TYPE 子協商中的 IS 位元組 (RFC 1091)
pub const TERM_TYPE_IS: u8 = 0;

/// TERMINAL-TYPE 子協商中的 SEND 位元組 (RFC 1091)
pub const TERM_TYPE_SEND: u8 = 1;

/// Telnet 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Sub-negotiation End
    Se = 240,
    /// No Operation
    Nop = 241,
    /// Data Mark
    DataMark = 242,
    /// Break
    Break = 243,
    /// Interrupt Process
    InterruptProcess = 244,
    /// Abort Output
    AbortOutput = 245,
    /// Are You There
    AreYouThere = 246,
    /// Erase Character
    EraseCharacter = 247,
    /// Erase Line
    EraseLine = 248,
    /// Go Ahead
    GoAhead = 249,
    /// Sub-negotiation Begin
    Sb = 250,
    /// Will
    Will = 251,
    /// Won't
    Wont = 252,
    /// Do
    Do = 253,
    /// Don't
    Dont = 254,
}

impl TelnetCommand {
    /// 從位元組解析 Telnet 命令
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(Self::Se),
            241 => Some(Self::Nop),
            242 => Some(Self::DataMark),
            243 => Some(Self::Break),
            244 => Some(Self::InterruptProcess),
            245 => Some(Self::AbortOutput),
            246 => Some(Self::AreYouThere),
            247 => Some(Self::EraseCharacter),
            248 => Some(Self::EraseLine),
            249 => Some(Self::GoAhead),
            250 => Some(Self::Sb),
            251 => Some(Self::Will),
            252 => Some(Self::Wont),
            253 => Some(Self::Do),
            254 => Some(Self::Dont),
            _ => None,
        }
    }
}

/// Telnet 選項
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// Echo (密碼遮罩協商)
    Echo,
    /// Suppress Go Ahead
    SuppressGoAhead,
    /// Terminal Type
    TerminalType,
    /// Window Size (NAWS)
    Naws,
    /// MSDP (Mud Server Data Protocol)
    Msdp,
    /// GMCP (Generic MUD Communication Protocol)
    Gmcp,
    /// 未知選項
    Unknown(u8),
}

impl TelnetOption {
    /// 從位元組解析 Telnet 選項
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Echo,
            3 => Self::SuppressGoAhead,
            24 => Self::TerminalType,
            31 => Self::Naws,
            69 => Self::Msdp,
            201 => Self::Gmcp,
            other => Self::Unknown(other),
        }
    }

    /// 獲取選項的位元組值
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Echo => 1,
            Self::SuppressGoAhead => 3,
            Self::TerminalType => 24,
            Self::Naws => 31,
            Self::Msdp => 69,
            Self::Gmcp => 201,
            Self::Unknown(b) => *b,
        }
    }
}
