//! C2: endianness and varint utilities shared across dissectors — MQTT's
//! variable-length integer, SSH's length-prefixed string/name-list, and DNS's
//! compressed domain-name decoder.

use crate::error::{DResult, ParseOutcome};
use crate::window::ByteWindow;

/// Decodes an MQTT "remaining length" variable-length integer starting at
/// `offset`. Returns the decoded value and the number of bytes consumed.
///
/// At most 4 bytes are read; each byte contributes its low 7 bits, MSB-first byte
/// first; the continuation bit (0x80) says another byte follows. A 5th
/// continuation byte is `InvalidFormat`. Max encoded value is 268,435,455.
pub fn read_varint(w: &ByteWindow, offset: usize) -> DResult<(u32, usize)> {
    let mut value: u32 = 0;
    let mut multiplier: u32 = 1;
    let mut consumed = 0;
    loop {
        if consumed == 4 {
            return Err(ParseOutcome::InvalidFormat("mqtt varint longer than 4 bytes"));
        }
        let byte = w.read_u8(offset + consumed)?;
        consumed += 1;
        value += u32::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }
    Ok((value, consumed))
}

/// Reads an SSH-style 32-bit-length-prefixed opaque string.
/// Returns the string bytes and the total number of bytes consumed (4 + len).
pub fn read_length_prefixed_bytes<'a>(w: &ByteWindow<'a>, offset: usize) -> DResult<(&'a [u8], usize)> {
    let len = w.read_u32(offset)? as usize;
    if offset + 4 + len > w.len() {
        return Err(ParseOutcome::InvalidFormat(
            "length-prefixed string longer than surrounding payload",
        ));
    }
    let sub = w.sub(offset + 4, len)?;
    Ok((sub.as_slice(), 4 + len))
}

/// Reads an SSH-style length-prefixed name-list: a length-prefixed string whose
/// payload is a comma-separated ASCII list. Empty entries between commas are
/// skipped. Returns the list and the total bytes consumed.
pub fn read_name_list(w: &ByteWindow, offset: usize) -> DResult<(Vec<String>, usize)> {
    let (bytes, consumed) = read_length_prefixed_bytes(w, offset)?;
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ParseOutcome::InvalidFormat("name-list is not valid ASCII/UTF-8"))?;
    let names = text
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    Ok((names, consumed))
}

/// Reads a UTF-8 MQTT string: 16-bit length prefix followed by that many UTF-8
/// bytes. Returns the string and total bytes consumed (2 + len).
pub fn read_utf8_string(w: &ByteWindow, offset: usize) -> DResult<(String, usize)> {
    let len = w.read_u16(offset)? as usize;
    let sub = w.sub(offset + 2, len)?;
    let s = std::str::from_utf8(sub.as_slice())
        .map_err(|_| ParseOutcome::InvalidFormat("not valid UTF-8"))?
        .to_string();
    Ok((s, 2 + len))
}

/// Maximum number of DNS compression-pointer hops before we bail with
/// `InvalidFormat`; prevents infinite/quadratic loops on adversarial input.
pub const MAX_POINTER_HOPS: u32 = 10;

/// Decodes a DNS domain name starting at `offset` within the *whole* DNS message
/// (compression pointers are absolute offsets into the message, so this needs the
/// full buffer rather than a dissector-local sub-window). Returns the dotted name
/// and the number of bytes consumed from `offset` in the *original* (non-followed)
/// stream — i.e. not counting bytes read after following a pointer.
pub fn read_domain_name(message: &[u8], offset: usize) -> DResult<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = offset;
    let mut hops = 0u32;
    let mut consumed_in_stream: Option<usize> = None;

    loop {
        if cursor >= message.len() {
            return Err(ParseOutcome::NeedMoreData);
        }
        let len_byte = message[cursor];
        if len_byte == 0 {
            if consumed_in_stream.is_none() {
                consumed_in_stream = Some(cursor + 1 - offset);
            }
            break;
        }
        if len_byte & 0xC0 == 0xC0 {
            // Compression pointer: 14 low bits of a 16-bit value are the offset.
            if cursor + 2 > message.len() {
                return Err(ParseOutcome::NeedMoreData);
            }
            if consumed_in_stream.is_none() {
                consumed_in_stream = Some(cursor + 2 - offset);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(ParseOutcome::InvalidFormat("dns name compression pointer chain too deep"));
            }
            let ptr = (u16::from(len_byte & 0x3F) << 8) | u16::from(message[cursor + 1]);
            cursor = ptr as usize;
            continue;
        }
        if len_byte & 0xC0 != 0 {
            return Err(ParseOutcome::InvalidFormat("reserved label length bits set"));
        }
        let label_len = len_byte as usize;
        let start = cursor + 1;
        let end = start + label_len;
        if end > message.len() {
            return Err(ParseOutcome::NeedMoreData);
        }
        let label = std::str::from_utf8(&message[start..end])
            .map_err(|_| ParseOutcome::InvalidFormat("dns label is not valid UTF-8"))?;
        labels.push(label.to_string());
        cursor = end;
    }

    Ok((labels.join("."), consumed_in_stream.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_single_byte() {
        let w = ByteWindow::new(&[0x00]);
        assert_eq!(read_varint(&w, 0).unwrap(), (0, 1));
        let w = ByteWindow::new(&[0x7F]);
        assert_eq!(read_varint(&w, 0).unwrap(), (127, 1));
    }

    #[test]
    fn varint_max_value() {
        // 0xFF 0xFF 0xFF 0x7F = 268,435,455
        let w = ByteWindow::new(&[0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(read_varint(&w, 0).unwrap(), (268_435_455, 4));
    }

    #[test]
    fn varint_fifth_continuation_byte_is_invalid() {
        let w = ByteWindow::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(
            read_varint(&w, 0),
            Err(ParseOutcome::InvalidFormat(_))
        ));
    }

    #[test]
    fn name_list_skips_empty_entries() {
        let mut buf = vec![0, 0, 0, 0];
        buf[3] = 11;
        buf.extend_from_slice(b"a,,b,,,c,,");
        let w = ByteWindow::new(&buf);
        let (names, consumed) = read_name_list(&w, 0).unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(consumed, 4 + 11);
    }

    #[test]
    fn domain_name_simple() {
        // 03 www 07 example 03 com 00
        let mut buf = vec![3];
        buf.extend_from_slice(b"www");
        buf.push(7);
        buf.extend_from_slice(b"example");
        buf.push(3);
        buf.extend_from_slice(b"com");
        buf.push(0);
        let (name, consumed) = read_domain_name(&buf, 0).unwrap();
        assert_eq!(name, "www.example.com");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn domain_name_pointer_chain_capped() {
        // Build a message where label at offset 0 points to offset 0 (a self-loop).
        let buf = [0xC0u8, 0x00];
        let err = read_domain_name(&buf, 0).unwrap_err();
        assert!(matches!(err, ParseOutcome::InvalidFormat(_)));
    }
}
