//! Diameter (RFC 6733) — 20-byte fixed header followed by a run of
//! TLV attribute-value pairs, each padded to a 4-byte boundary.

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

pub const HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvpFlags {
    pub vendor_specific: bool,
    pub mandatory: bool,
    pub is_private: bool,
}

impl AvpFlags {
    fn from_u8(b: u8) -> AvpFlags {
        AvpFlags {
            vendor_specific: b & 0x80 != 0,
            mandatory: b & 0x40 != 0,
            is_private: b & 0x20 != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiameterAvp {
    pub code: u32,
    pub flags: AvpFlags,
    pub vendor_id: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiameterHeader {
    pub version: u8,
    pub message_length: u32,
    pub flags: u8,
    pub command_code: u32,
    pub application_id: u32,
    pub hop_by_hop_id: u32,
    pub end_to_end_id: u32,
}

impl DiameterHeader {
    pub fn is_request(&self) -> bool {
        self.flags & 0x80 != 0
    }

    pub fn is_proxiable(&self) -> bool {
        self.flags & 0x40 != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & 0x20 != 0
    }

    pub fn is_retransmit(&self) -> bool {
        self.flags & 0x10 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiameterMessage {
    pub header: DiameterHeader,
    pub avps: Vec<DiameterAvp>,
}

impl DiameterMessage {
    pub fn find_avp(&self, code: u32) -> Option<&DiameterAvp> {
        self.avps.iter().find(|a| a.code == code)
    }

    pub fn session_id(&self) -> Option<String> {
        self.find_avp(263).and_then(|a| String::from_utf8(a.data.clone()).ok())
    }

    pub fn origin_host(&self) -> Option<String> {
        self.find_avp(264).and_then(|a| String::from_utf8(a.data.clone()).ok())
    }

    pub fn result_code(&self) -> Option<u32> {
        self.find_avp(268).and_then(|a| {
            if a.data.len() == 4 {
                Some(u32::from_be_bytes([a.data[0], a.data[1], a.data[2], a.data[3]]))
            } else {
                None
            }
        })
    }

    pub fn origin_realm(&self) -> Option<String> {
        self.find_avp(296).and_then(|a| String::from_utf8(a.data.clone()).ok())
    }

    pub fn destination_host(&self) -> Option<String> {
        self.find_avp(293).and_then(|a| String::from_utf8(a.data.clone()).ok())
    }

    pub fn destination_realm(&self) -> Option<String> {
        self.find_avp(283).and_then(|a| String::from_utf8(a.data.clone()).ok())
    }

    pub fn user_name(&self) -> Option<String> {
        self.find_avp(1).and_then(|a| String::from_utf8(a.data.clone()).ok())
    }

    pub fn auth_application_id(&self) -> Option<u32> {
        self.find_avp(258).and_then(|a| {
            if a.data.len() == 4 {
                Some(u32::from_be_bytes([a.data[0], a.data[1], a.data[2], a.data[3]]))
            } else {
                None
            }
        })
    }

    /// Parses a Grouped AVP's Data field as a nested run of AVPs (RFC 6733
    /// §4.4). Returns `None` rather than an error if the bytes don't parse —
    /// a malformed group shouldn't fail the whole message.
    pub fn grouped_avp(&self, code: u32) -> Option<Vec<DiameterAvp>> {
        let avp = self.find_avp(code)?;
        let window = ByteWindow::new(&avp.data);
        parse_avps(&window, window.len()).ok()
    }
}

fn parse_header(w: &ByteWindow) -> Result<DiameterHeader, ParseOutcome> {
    let version = w.read_u8(0)?;
    if version != 1 {
        return Err(ParseOutcome::UnsupportedVersion);
    }
    let message_length = w.read_u24(1)?;
    let flags = w.read_u8(4)?;
    let command_code = w.read_u24(5)?;
    let application_id = w.read_u32(8)?;
    let hop_by_hop_id = w.read_u32(12)?;
    let end_to_end_id = w.read_u32(16)?;
    Ok(DiameterHeader {
        version,
        message_length,
        flags,
        command_code,
        application_id,
        hop_by_hop_id,
        end_to_end_id,
    })
}

fn padded_length(len: usize) -> usize {
    (len + 3) & !3
}

fn parse_avp(w: &ByteWindow, offset: usize) -> Result<(DiameterAvp, usize), ParseOutcome> {
    let code = w.read_u32(offset)?;
    let flag_byte = w.read_u8(offset + 4)?;
    let flags = AvpFlags::from_u8(flag_byte);
    let avp_length = w.read_u24(offset + 5)? as usize;
    if avp_length < 8 {
        return Err(ParseOutcome::InvalidFormat("Diameter AVP length smaller than its own header"));
    }
    let mut pos = offset + 8;
    let vendor_id = if flags.vendor_specific {
        let v = w.read_u32(pos)?;
        pos += 4;
        v
    } else {
        0
    };
    let data_len = avp_length - (pos - offset);
    let data = w.sub(pos, data_len)?.as_slice().to_vec();
    let total_len = padded_length(avp_length);
    Ok((
        DiameterAvp {
            code,
            flags,
            vendor_id,
            data,
        },
        total_len,
    ))
}

/// Parses every AVP in `w[start_offset..end]`. Shared between the top-level
/// message body and a Grouped AVP's nested Data field.
fn parse_avps(w: &ByteWindow, end: usize) -> Result<Vec<DiameterAvp>, ParseOutcome> {
    let mut offset = 0;
    let mut avps = Vec::new();
    while offset < end {
        let (avp, consumed) = parse_avp(w, offset)?;
        avps.push(avp);
        offset += consumed;
    }
    Ok(avps)
}

fn parse_message(window: &ByteWindow) -> Result<(DiameterMessage, usize), ParseOutcome> {
    if window.len() < HEADER_SIZE {
        return Err(ParseOutcome::BufferTooSmall);
    }
    let header = parse_header(window)?;
    let message_length = header.message_length as usize;
    if message_length < HEADER_SIZE {
        return Err(ParseOutcome::InvalidFormat("Diameter Message-Length smaller than header"));
    }
    let body = window.sub(HEADER_SIZE, message_length - HEADER_SIZE)?;
    let avps = parse_avps(&body, message_length - HEADER_SIZE)?;

    Ok((DiameterMessage { header, avps }, message_length))
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "Diameter",
    protocol_id: 3868,
    min_header_size: HEADER_SIZE,
    min_message_size: HEADER_SIZE,
    max_message_size: 16_777_215,
};

#[derive(Default)]
pub struct DiameterDissector {
    messages_seen: usize,
}

impl DiameterDissector {
    pub fn new() -> DiameterDissector {
        DiameterDissector::default()
    }
}

impl Dissector for DiameterDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        window.len() >= HEADER_SIZE && window.read_u8(0).map(|v| v == 1).unwrap_or(false)
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let window = *context.window();
        match parse_message(&window) {
            Ok((message, consumed)) => {
                context.advance(consumed);
                self.messages_seen += 1;
                context.publish("diameter_message", Record::Diameter(message));
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
        self.messages_seen = 0;
    }

    fn progress(&self) -> f64 {
        if self.messages_seen > 0 {
            1.0
        } else {
            0.0
        }
    }
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register(crate::registry::ProtocolKey::Port(3868), || {
        Box::new(DiameterDissector::new())
    });
}
