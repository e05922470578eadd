//! MSDP 編碼器
//!
//! 產生送往伺服器的 MSDP 子協商：`LIST`/`REPORT`/`SEND` 命令，
//! 以及把任意 [`MsdpValue`] 結構編回線路格式（測試用的往返驗證也靠它）。

use std::collections::BTreeMap;

use super::{
    MsdpValue, MSDP, MSDP_ARRAY_CLOSE, MSDP_ARRAY_OPEN, MSDP_TABLE_CLOSE, MSDP_TABLE_OPEN,
    MSDP_VAL, MSDP_VAR,
};
use crate::telnet::{TelnetCommand, IAC};

/// `IAC SB MSDP VAR "LIST" VAL <target> IAC SE`
pub fn list_message(target: &str) -> Vec<u8> {
    command_message("LIST", std::iter::once(target))
}

/// `IAC SB MSDP VAR "REPORT" VAL v1 VAL v2 ... IAC SE`
pub fn report_message<'a>(variables: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
    command_message("REPORT", variables)
}

/// `IAC SB MSDP VAR "SEND" VAL <target> IAC SE`
pub fn send_message(target: &str) -> Vec<u8> {
    command_message("SEND", std::iter::once(target))
}

fn command_message<'a>(command: &str, values: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
    let mut msg = vec![IAC, TelnetCommand::Sb as u8, MSDP, MSDP_VAR];
    push_escaped(&mut msg, command.as_bytes());
    for value in values {
        msg.push(MSDP_VAL);
        push_escaped(&mut msg, value.as_bytes());
    }
    msg.push(IAC);
    msg.push(TelnetCommand::Se as u8);
    msg
}

/// 把整組變數編為完整框架（含外封）
pub fn encode(map: &BTreeMap<String, MsdpValue>) -> Vec<u8> {
    let mut msg = vec![IAC, TelnetCommand::Sb as u8, MSDP];
    for (name, value) in map {
        msg.push(MSDP_VAR);
        push_escaped(&mut msg, name.as_bytes());
        msg.push(MSDP_VAL);
        encode_value(&mut msg, value);
    }
    msg.push(IAC);
    msg.push(TelnetCommand::Se as u8);
    msg
}

fn encode_value(buf: &mut Vec<u8>, value: &MsdpValue) {
    match value {
        MsdpValue::String(s) => push_escaped(buf, s.as_bytes()),
        MsdpValue::Int(i) => push_escaped(buf, i.to_string().as_bytes()),
        MsdpValue::Array(items) => {
            buf.push(MSDP_ARRAY_OPEN);
            for item in items {
                buf.push(MSDP_VAL);
                encode_value(buf, item);
            }
            buf.push(MSDP_ARRAY_CLOSE);
        }
        MsdpValue::Table(map) => {
            buf.push(MSDP_TABLE_OPEN);
            for (key, val) in map {
                buf.push(MSDP_VAR);
                push_escaped(buf, key.as_bytes());
                buf.push(MSDP_VAL);
                encode_value(buf, val);
            }
            buf.push(MSDP_TABLE_CLOSE);
        }
    }
}

/// 負載中的字面 0xFF 必須跳脫為 0xFF 0xFF
fn push_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == IAC {
            buf.push(IAC);
        }
        buf.push(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msdp::decoder;

    #[test]
    fn test_list_message_bytes() {
        let msg = list_message("REPORTABLE_VARIABLES");
        let mut expected = vec![0xFF, 0xFA, 0x45, 0x01];
        expected.extend_from_slice(b"LIST");
        expected.push(0x02);
        expected.extend_from_slice(b"REPORTABLE_VARIABLES");
        expected.extend_from_slice(&[0xFF, 0xF0]);
        assert_eq!(msg, expected);
    }

    #[test]
    fn test_report_message_chains_vals() {
        let msg = report_message(["HEALTH", "MANA"]);
        let map = decoder::decode(&msg).unwrap();
        assert_eq!(
            map.get("REPORT"),
            Some(&MsdpValue::Array(vec![
                MsdpValue::from("HEALTH"),
                MsdpValue::from("MANA"),
            ]))
        );
    }

    #[test]
    fn test_roundtrip_nested_structure() {
        // 解碼輸出域內的結構 encode 後 decode 回到原值
        let mut member = BTreeMap::new();
        member.insert("name".to_string(), MsdpValue::from("Ara"));
        member.insert("health".to_string(), MsdpValue::from("812"));

        let mut room = BTreeMap::new();
        room.insert("VNUM".to_string(), MsdpValue::from("2347"));
        room.insert(
            "EXITS".to_string(),
            MsdpValue::Array(vec![MsdpValue::from("n"), MsdpValue::from("e")]),
        );

        let mut map = BTreeMap::new();
        map.insert("ROOM".to_string(), MsdpValue::Table(room));
        map.insert(
            "GROUP".to_string(),
            MsdpValue::Array(vec![MsdpValue::Table(member)]),
        );
        map.insert("CHARACTER_NAME".to_string(), MsdpValue::from("Zed"));

        let decoded = decoder::decode(&encode(&map)).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_roundtrip_empty_string() {
        let mut map = BTreeMap::new();
        map.insert("EMPTY".to_string(), MsdpValue::from(""));
        let decoded = decoder::decode(&encode(&map)).unwrap();
        assert_eq!(decoded, map);
    }
}
