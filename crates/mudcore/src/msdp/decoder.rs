//! MSDP 解碼器
//!
//! 把一段 Telnet 子協商 (`IAC SB MSDP ... IAC SE`) 解碼為
//! 名稱 → [`MsdpValue`] 的映射。純函數，呼叫之間不保留任何狀態。
//!
//! 文法（非正式）：
//! ```text
//! payload   := (var_entry)*
//! var_entry := VAR name (VAL value (VAL value)*)?
//! value     := string | TABLE_OPEN (var_entry)* TABLE_CLOSE
//!                     | ARRAY_OPEN (VAL value)* ARRAY_CLOSE
//! ```
//! 同一個 VAR 後面連續多個 VAL（REPORT 的列表慣例）會以序列呈現。

use std::collections::BTreeMap;

use thiserror::Error;

use super::{
    MsdpValue, MSDP, MSDP_ARRAY_CLOSE, MSDP_ARRAY_OPEN, MSDP_TABLE_CLOSE, MSDP_TABLE_OPEN,
    MSDP_VAL, MSDP_VAR,
};
use crate::telnet::{TelnetCommand, IAC};

/// 框架格式錯誤。解碼失敗時整個框架丟棄，連線繼續。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MsdpError {
    #[error("框架太短，不足以構成 MSDP 子協商")]
    TooShort,

    #[error("框架開頭不是 IAC SB MSDP")]
    BadEnvelopeStart,

    #[error("框架結尾不是 IAC SE")]
    BadEnvelopeEnd,

    #[error("位置 {pos} 應為 VAR，卻是 {byte:#04x}")]
    ExpectedVar { pos: usize, byte: u8 },

    #[error("表內位置 {pos} 應為 VAL")]
    ExpectedVal { pos: usize },

    #[error("TABLE_OPEN 未在負載結束前閉合")]
    UnclosedTable,

    #[error("ARRAY_OPEN 未在負載結束前閉合")]
    UnclosedArray,

    #[error("字串中出現禁用位元組 {0:#04x}")]
    ForbiddenByte(u8),

    #[error("值在負載結束處被截斷")]
    TruncatedValue,
}

/// 解碼完整的 MSDP 子協商框架（含 `IAC SB MSDP` 與 `IAC SE` 外封）
pub fn decode(input: &[u8]) -> Result<BTreeMap<String, MsdpValue>, MsdpError> {
    if input.len() < 5 {
        return Err(MsdpError::TooShort);
    }
    if input[0] != IAC || input[1] != TelnetCommand::Sb as u8 || input[2] != MSDP {
        return Err(MsdpError::BadEnvelopeStart);
    }
    let last = input.len() - 1;
    if input[last] != TelnetCommand::Se as u8 || input[last - 1] != IAC {
        return Err(MsdpError::BadEnvelopeEnd);
    }

    decode_payload(&input[3..last - 1])
}

/// 解碼去除外封後的 MSDP 負載
pub fn decode_payload(data: &[u8]) -> Result<BTreeMap<String, MsdpValue>, MsdpError> {
    let mut map = BTreeMap::new();
    let mut i = 0;

    while i < data.len() {
        if data[i] == IAC {
            break;
        }
        if data[i] != MSDP_VAR {
            return Err(MsdpError::ExpectedVar { pos: i, byte: data[i] });
        }
        i += 1;
        let name = read_string(data, &mut i)?;

        if i >= data.len() || data[i] == IAC || data[i] != MSDP_VAL {
            // VAR 後沒有 VAL：空字串值
            map.insert(name, MsdpValue::String(String::new()));
            continue;
        }
        i += 1; // 越過 VAL

        // VAL 緊接另一個控制位元組 = 空值
        if i >= data.len() || data[i] == IAC {
            map.insert(name, MsdpValue::String(String::new()));
            break;
        }
        if data[i] == MSDP_VAR {
            map.insert(name, MsdpValue::String(String::new()));
            continue;
        }

        let value = parse_value(data, &mut i)?;

        // 連鎖 VAL（REPORT 等列表命令）收集為序列
        if i < data.len() && data[i] == MSDP_VAL {
            let mut items = vec![value];
            while i < data.len() && data[i] == MSDP_VAL {
                i += 1;
                if i >= data.len() || data[i] == IAC {
                    items.push(MsdpValue::String(String::new()));
                    break;
                }
                if data[i] == MSDP_VAR {
                    items.push(MsdpValue::String(String::new()));
                    break;
                }
                items.push(parse_value(data, &mut i)?);
            }
            map.insert(name, MsdpValue::Array(items));
        } else {
            map.insert(name, value);
        }
    }

    Ok(map)
}

fn parse_value(data: &[u8], i: &mut usize) -> Result<MsdpValue, MsdpError> {
    match data.get(*i) {
        None => Err(MsdpError::TruncatedValue),
        Some(&MSDP_TABLE_OPEN) => {
            *i += 1;
            parse_table(data, i)
        }
        Some(&MSDP_ARRAY_OPEN) => {
            *i += 1;
            parse_array(data, i)
        }
        Some(_) => Ok(MsdpValue::String(read_string(data, i)?)),
    }
}

fn parse_table(data: &[u8], i: &mut usize) -> Result<MsdpValue, MsdpError> {
    let mut map = BTreeMap::new();

    while *i < data.len() && data[*i] != MSDP_TABLE_CLOSE {
        if data[*i] != MSDP_VAR {
            return Err(MsdpError::ExpectedVar { pos: *i, byte: data[*i] });
        }
        *i += 1;
        let key = read_string(data, i)?;

        if *i >= data.len() || data[*i] != MSDP_VAL {
            return Err(MsdpError::ExpectedVal { pos: *i });
        }
        *i += 1;

        let value = if *i < data.len()
            && (data[*i] == MSDP_VAR || data[*i] == MSDP_TABLE_CLOSE || data[*i] == MSDP_VAL)
        {
            MsdpValue::String(String::new())
        } else {
            parse_value(data, i)?
        };
        map.insert(key, value);
    }

    if *i < data.len() && data[*i] == MSDP_TABLE_CLOSE {
        *i += 1;
        Ok(MsdpValue::Table(map))
    } else {
        Err(MsdpError::UnclosedTable)
    }
}

fn parse_array(data: &[u8], i: &mut usize) -> Result<MsdpValue, MsdpError> {
    let mut items = Vec::new();

    while *i < data.len() && data[*i] != MSDP_ARRAY_CLOSE {
        if data[*i] != MSDP_VAL {
            return Err(MsdpError::ExpectedVal { pos: *i });
        }
        *i += 1;
        let value = if *i < data.len() && (data[*i] == MSDP_VAL || data[*i] == MSDP_ARRAY_CLOSE) {
            MsdpValue::String(String::new())
        } else {
            parse_value(data, i)?
        };
        items.push(value);
    }

    if *i < data.len() && data[*i] == MSDP_ARRAY_CLOSE {
        *i += 1;
        Ok(MsdpValue::Array(items))
    } else {
        Err(MsdpError::UnclosedArray)
    }
}

/// 讀取到下一個控制位元組 (0x01..=0x06, 0xFF) 或負載結尾為止。
/// 字串內的 0x00 是禁用位元組，必須點名回報。
fn read_string(data: &[u8], i: &mut usize) -> Result<String, MsdpError> {
    let start = *i;
    while *i < data.len() {
        let b = data[*i];
        if (MSDP_VAR..=MSDP_ARRAY_CLOSE).contains(&b) || b == IAC {
            break;
        }
        if b == 0 {
            return Err(MsdpError::ForbiddenByte(0));
        }
        *i += 1;
    }
    Ok(String::from_utf8_lossy(&data[start..*i]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut f = vec![0xFF, 0xFA, 0x45];
        f.extend_from_slice(payload);
        f.extend_from_slice(&[0xFF, 0xF0]);
        f
    }

    #[test]
    fn test_simple_string_variable() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"ROOM_VNUM");
        payload.push(0x02);
        payload.extend_from_slice(b"2347");

        let map = decode(&frame(&payload)).unwrap();
        assert_eq!(map.get("ROOM_VNUM"), Some(&MsdpValue::from("2347")));
    }

    #[test]
    fn test_array_of_tables() {
        // GROUP = [ {"n": "A"} ]
        let input = [
            0xFF, 0xFA, 0x45, 0x01, b'G', b'R', b'O', b'U', b'P', 0x02, 0x05, 0x03, 0x01, b'n',
            0x02, b'A', 0x04, 0x06, 0xFF, 0xF0,
        ];
        let map = decode(&input).unwrap();

        let mut inner = BTreeMap::new();
        inner.insert("n".to_string(), MsdpValue::from("A"));
        assert_eq!(
            map.get("GROUP"),
            Some(&MsdpValue::Array(vec![MsdpValue::Table(inner)]))
        );
    }

    #[test]
    fn test_chained_vals_become_sequence() {
        // REPORT 慣例: VAR name VAL a VAL b VAL c
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"REPORTABLE_VARIABLES");
        for v in [b"HEALTH".as_slice(), b"MANA", b"ROOM_VNUM"] {
            payload.push(0x02);
            payload.extend_from_slice(v);
        }

        let map = decode(&frame(&payload)).unwrap();
        assert_eq!(
            map.get("REPORTABLE_VARIABLES"),
            Some(&MsdpValue::Array(vec![
                MsdpValue::from("HEALTH"),
                MsdpValue::from("MANA"),
                MsdpValue::from("ROOM_VNUM"),
            ]))
        );
    }

    #[test]
    fn test_multiple_variables() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"HEALTH");
        payload.push(0x02);
        payload.extend_from_slice(b"100");
        payload.push(0x01);
        payload.extend_from_slice(b"MANA");
        payload.push(0x02);
        payload.extend_from_slice(b"55");

        let map = decode(&frame(&payload)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("HEALTH"), Some(&MsdpValue::from("100")));
        assert_eq!(map.get("MANA"), Some(&MsdpValue::from("55")));
    }

    #[test]
    fn test_empty_value() {
        // VAL 後緊接下一個 VAR = 空字串
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"EMPTY");
        payload.push(0x02);
        payload.push(0x01);
        payload.extend_from_slice(b"NEXT");
        payload.push(0x02);
        payload.push(b'x');

        let map = decode(&frame(&payload)).unwrap();
        assert_eq!(map.get("EMPTY"), Some(&MsdpValue::from("")));
        assert_eq!(map.get("NEXT"), Some(&MsdpValue::from("x")));
    }

    #[test]
    fn test_var_without_val() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"LONELY");

        let map = decode(&frame(&payload)).unwrap();
        assert_eq!(map.get("LONELY"), Some(&MsdpValue::from("")));
    }

    #[test]
    fn test_bad_envelope() {
        assert_eq!(decode(&[0xFF, 0xFA]), Err(MsdpError::TooShort));
        assert_eq!(
            decode(&[0xFF, 0xFA, 0x18, 0x01, 0xFF, 0xF0]),
            Err(MsdpError::BadEnvelopeStart)
        );
        assert_eq!(
            decode(&[0xFF, 0xFA, 0x45, 0x01, b'a', 0xF0]),
            Err(MsdpError::BadEnvelopeEnd)
        );
    }

    #[test]
    fn test_unclosed_table() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"T");
        payload.push(0x02);
        payload.push(0x03); // TABLE_OPEN 不閉合
        payload.push(0x01);
        payload.push(b'k');
        payload.push(0x02);
        payload.push(b'v');

        assert_eq!(decode(&frame(&payload)), Err(MsdpError::UnclosedTable));
    }

    #[test]
    fn test_unclosed_array() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"A");
        payload.push(0x02);
        payload.push(0x05); // ARRAY_OPEN 不閉合
        payload.push(0x02);
        payload.push(b'x');

        assert_eq!(decode(&frame(&payload)), Err(MsdpError::UnclosedArray));
    }

    #[test]
    fn test_forbidden_nul_byte_named() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"BAD");
        payload.push(0x02);
        payload.extend_from_slice(&[b'a', 0x00, b'b']);

        let err = decode(&frame(&payload)).unwrap_err();
        assert_eq!(err, MsdpError::ForbiddenByte(0));
        assert!(err.to_string().contains("0x00"));
    }

    #[test]
    fn test_nested_table_in_table() {
        // VAR "ROOM" VAL TABLE_OPEN VAR "EXITS" VAL TABLE_OPEN VAR "n" VAL "1001" TC TC
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"ROOM");
        payload.push(0x02);
        payload.push(0x03);
        payload.push(0x01);
        payload.extend_from_slice(b"EXITS");
        payload.push(0x02);
        payload.push(0x03);
        payload.push(0x01);
        payload.push(b'n');
        payload.push(0x02);
        payload.extend_from_slice(b"1001");
        payload.push(0x04);
        payload.push(0x04);

        let map = decode(&frame(&payload)).unwrap();
        let room = map.get("ROOM").and_then(|v| v.as_table().cloned()).unwrap();
        let exits = room.get("EXITS").and_then(|v| v.as_table().cloned()).unwrap();
        assert_eq!(exits.get("n"), Some(&MsdpValue::from("1001")));
    }

    #[test]
    fn test_decoder_is_pure() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(b"X");
        payload.push(0x02);
        payload.push(b'1');
        let f = frame(&payload);

        let first = decode(&f).unwrap();
        let second = decode(&f).unwrap();
        assert_eq!(first, second);
    }
}
