//! Telnet 協定模組
//!
//! 實作 Telnet 位元組流解譯與選項協商

mod interpreter;
mod negotiation;
mod protocol;

pub use interpreter::{TelnetEvent, TelnetMachine};
pub use negotiation::{NegotiationOutcome, Negotiator};
pub use protocol::{TelnetCommand, TelnetOption, IAC, LINE_TERMINATOR, TERM_TYPE_IS, TERM_TYPE_SEND};
