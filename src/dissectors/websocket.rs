//! C8: WebSocket (RFC 6455) — HTTP/1.1 handshake parsing plus frame parsing.

use std::collections::HashMap;

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    fn from_u8(v: u8) -> Opcode {
        match v {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong) || matches!(self, Opcode::Reserved(o) if *o >= 0x8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub masking_key: Option<u32>,
    pub payload: Vec<u8>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub method: String,
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub websocket_key: Option<String>,
    pub websocket_accept: Option<String>,
    pub protocols: Vec<String>,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketRecord {
    Handshake(Handshake),
    Frame(Frame),
}

/// Computes `Sec-WebSocket-Accept` from `Sec-WebSocket-Key` per RFC 6455 §1.3:
/// base64(SHA-1(key + GUID)). A real SHA-1 (the teacher's source had a
/// placeholder here; spec.md's Open Questions call for a conforming one).
pub fn calculate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

fn parse_handshake(data: &[u8]) -> Result<Handshake, ParseOutcome> {
    let text = std::str::from_utf8(data).map_err(|_| ParseOutcome::InvalidFormat("handshake is not valid UTF-8"))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or(ParseOutcome::NeedMoreData)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(ParseOutcome::InvalidFormat("missing HTTP method"))?.to_string();
    let uri = parts.next().ok_or(ParseOutcome::InvalidFormat("missing request URI"))?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some(idx) = line.find(':') {
            let name = line[..idx].trim().to_ascii_lowercase();
            let value = line[idx + 1..].trim().to_string();
            headers.insert(name, value);
        }
    }

    let upgrade_ok = headers.get("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
    let connection_ok = headers
        .get("connection")
        .map(|v| v.to_ascii_lowercase().split(',').any(|p| p.trim() == "upgrade"))
        .unwrap_or(false);
    let version_ok = headers.get("sec-websocket-version").map(|v| v == "13").unwrap_or(false);
    if !(upgrade_ok && connection_ok && version_ok) {
        return Err(ParseOutcome::InvalidFormat("missing/invalid websocket upgrade headers"));
    }

    let websocket_key = headers.get("sec-websocket-key").cloned();
    let websocket_accept = websocket_key.as_deref().map(calculate_accept_key);
    let protocols = headers
        .get("sec-websocket-protocol")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();
    let extensions = headers
        .get("sec-websocket-extensions")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    Ok(Handshake {
        method,
        uri,
        headers,
        websocket_key,
        websocket_accept,
        protocols,
        extensions,
    })
}

fn parse_frame<'a>(window: &ByteWindow<'a>) -> Result<(Frame, usize), ParseOutcome> {
    let b0 = window.read_u8(0)?;
    let b1 = window.read_u8(1)?;
    let fin = b0 & 0x80 != 0;
    let rsv1 = b0 & 0x40 != 0;
    let rsv2 = b0 & 0x20 != 0;
    let rsv3 = b0 & 0x10 != 0;
    if rsv1 || rsv2 || rsv3 {
        return Err(ParseOutcome::InvalidFormat("RSV1-3 set without a negotiated extension"));
    }
    let opcode = Opcode::from_u8(b0 & 0x0F);
    let masked = b1 & 0x80 != 0;
    let len7 = b1 & 0x7F;

    let mut offset = 2;
    let payload_length: u64 = match len7 {
        126 => {
            let v = window.read_u16(offset)? as u64;
            offset += 2;
            v
        }
        127 => {
            let v = window.read_u64(offset)?;
            offset += 8;
            v
        }
        direct => {
            offset += 0;
            direct as u64
        }
    };

    if opcode.is_control() {
        if !fin {
            return Err(ParseOutcome::InvalidFormat("control frame must have FIN set"));
        }
        if payload_length > 125 {
            return Err(ParseOutcome::InvalidFormat("control frame payload exceeds 125 bytes"));
        }
    }

    let masking_key = if masked {
        let key = window.read_u32(offset)?;
        offset += 4;
        Some(key)
    } else {
        None
    };

    let payload_window = window.sub(offset, payload_length as usize)?;
    let mut payload = payload_window.as_slice().to_vec();
    if let Some(key) = masking_key {
        let key_bytes = key.to_be_bytes();
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key_bytes[i % 4];
        }
    }
    offset += payload_length as usize;

    if opcode == Opcode::Close {
        if payload.len() == 1 {
            return Err(ParseOutcome::InvalidFormat("close frame of length 1 is invalid"));
        }
        if payload.len() >= 2 {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if is_invalid_close_code(code) {
                return Err(ParseOutcome::InvalidFormat("invalid websocket close code"));
            }
        }
    }

    let text = if opcode == Opcode::Text {
        Some(std::str::from_utf8(&payload).map_err(|_| ParseOutcome::InvalidFormat("text frame is not valid UTF-8"))?.to_string())
    } else {
        None
    };

    Ok((
        Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            masked,
            masking_key,
            payload,
            text,
        },
        offset,
    ))
}

fn is_invalid_close_code(code: u16) -> bool {
    matches!(code, 1004 | 1005 | 1006 | 1012..=1014 | 1100) || code < 1000
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "WebSocket",
    protocol_id: 80,
    min_header_size: 2,
    min_message_size: 2,
    max_message_size: 64 * 1024 * 1024,
};

#[derive(Default)]
pub struct WebSocketDissector {
    handshake_complete: bool,
}

impl WebSocketDissector {
    pub fn new() -> WebSocketDissector {
        WebSocketDissector::default()
    }
}

impl Dissector for WebSocketDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        let data = window.as_slice();
        data.starts_with(b"GET ") || data.starts_with(b"HTTP/1.1") || window.len() >= 2
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let window = *context.window();
        let data = window.as_slice();

        if !self.handshake_complete && (data.starts_with(b"GET ") || data.starts_with(b"HTTP/1.1")) {
            return match parse_handshake(data) {
                Ok(handshake) => {
                    context.advance(data.len());
                    self.handshake_complete = true;
                    context.publish("websocket_record", Record::WebSocket(WebSocketRecord::Handshake(handshake)));
                    context.set_stage(Stage::Complete);
                    ParseOutcome::Success
                }
                Err(outcome) => {
                    if !outcome.is_recoverable() {
                        context.set_stage(Stage::Error);
                    }
                    outcome
                }
            };
        }

        match parse_frame(&window) {
            Ok((frame, consumed)) => {
                context.advance(consumed);
                context.publish("websocket_record", Record::WebSocket(WebSocketRecord::Frame(frame)));
                context.set_stage(Stage::Complete);
                ParseOutcome::Success
            }
            Err(outcome) => {
                if !outcome.is_recoverable() {
                    context.set_stage(Stage::Error);
                }
                outcome
            }
        }
    }

    fn reset(&mut self) {
        self.handshake_complete = false;
    }

    fn progress(&self) -> f64 {
        if self.handshake_complete {
            1.0
        } else {
            0.0
        }
    }
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register(crate::registry::ProtocolKey::Port(80), || {
        Box::new(WebSocketDissector::new())
    });
}
