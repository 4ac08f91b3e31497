//! M3UA (RFC 4666, SIGTRAN MTP3 user adaptation) — 8-byte common header
//! followed by TLV parameters padded to 4-byte boundaries.

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Management,
    Transfer,
    SignalingNetworkManagement,
    AspStateMaintenance,
    AspTrafficMaintenance,
    RoutingKeyManagement,
    Unknown(u8),
}

impl MessageClass {
    fn from_u8(v: u8) -> MessageClass {
        match v {
            0 => MessageClass::Management,
            1 => MessageClass::Transfer,
            2 => MessageClass::SignalingNetworkManagement,
            3 => MessageClass::AspStateMaintenance,
            4 => MessageClass::AspTrafficMaintenance,
            5 => MessageClass::RoutingKeyManagement,
            other => MessageClass::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct M3uaHeader {
    pub version: u8,
    pub message_class: MessageClass,
    pub message_type: u8,
    pub message_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M3uaParameter {
    pub tag: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M3uaMessage {
    pub header: M3uaHeader,
    pub parameters: Vec<M3uaParameter>,
}

impl M3uaMessage {
    pub fn find_parameter(&self, tag: u16) -> Option<&M3uaParameter> {
        self.parameters.iter().find(|p| p.tag == tag)
    }

    pub fn is_asp_up(&self) -> bool {
        matches!(self.header.message_class, MessageClass::AspStateMaintenance) && self.header.message_type == 3
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.header.message_class, MessageClass::AspStateMaintenance) && self.header.message_type == 2
    }
}

fn padded_length(len: usize) -> usize {
    (len + 3) & !3
}

fn parse_header(w: &ByteWindow) -> Result<M3uaHeader, ParseOutcome> {
    let version = w.read_u8(0)?;
    if version != 1 {
        return Err(ParseOutcome::UnsupportedVersion);
    }
    let message_class = MessageClass::from_u8(w.read_u8(2)?);
    let message_type = w.read_u8(3)?;
    let message_length = w.read_u32(4)?;
    Ok(M3uaHeader {
        version,
        message_class,
        message_type,
        message_length,
    })
}

fn parse_parameters(w: &ByteWindow) -> Result<Vec<M3uaParameter>, ParseOutcome> {
    let mut parameters = Vec::new();
    let mut offset = 0;
    while offset < w.len() {
        let tag = w.read_u16(offset)?;
        let length = w.read_u16(offset + 2)? as usize;
        if length < 4 {
            return Err(ParseOutcome::InvalidFormat("M3UA parameter length smaller than its own header"));
        }
        let value = w.sub(offset + 4, length - 4)?.as_slice().to_vec();
        parameters.push(M3uaParameter { tag, value });
        offset += padded_length(length);
    }
    Ok(parameters)
}

fn parse_message(window: &ByteWindow) -> Result<(M3uaMessage, usize), ParseOutcome> {
    if window.len() < HEADER_SIZE {
        return Err(ParseOutcome::BufferTooSmall);
    }
    let header = parse_header(window)?;
    let total_len = header.message_length as usize;
    if total_len < HEADER_SIZE {
        return Err(ParseOutcome::InvalidFormat("M3UA Message Length smaller than header"));
    }
    let body = window.sub(HEADER_SIZE, total_len - HEADER_SIZE)?;
    let parameters = parse_parameters(&body)?;
    Ok((M3uaMessage { header, parameters }, total_len))
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "M3UA",
    protocol_id: 2905,
    min_header_size: HEADER_SIZE,
    min_message_size: HEADER_SIZE,
    max_message_size: 65535,
};

#[derive(Default)]
pub struct M3uaDissector {
    messages_seen: usize,
}

impl M3uaDissector {
    pub fn new() -> M3uaDissector {
        M3uaDissector::default()
    }
}

impl Dissector for M3uaDissector {
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
                context.publish("m3ua_message", Record::M3ua(message));
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
    registry.register(crate::registry::ProtocolKey::Port(2905), || {
        Box::new(M3uaDissector::new())
    });
}
