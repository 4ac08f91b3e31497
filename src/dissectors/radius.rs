//! RADIUS (RFC 2865) — fixed header with a 16-byte authenticator, followed
//! by type-length-value attributes.

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

pub const HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiusCode {
    AccessRequest,
    AccessAccept,
    AccessReject,
    AccountingRequest,
    AccountingResponse,
    AccessChallenge,
    StatusServer,
    StatusClient,
    Unknown(u8),
}

impl RadiusCode {
    fn from_u8(v: u8) -> RadiusCode {
        match v {
            1 => RadiusCode::AccessRequest,
            2 => RadiusCode::AccessAccept,
            3 => RadiusCode::AccessReject,
            4 => RadiusCode::AccountingRequest,
            5 => RadiusCode::AccountingResponse,
            11 => RadiusCode::AccessChallenge,
            12 => RadiusCode::StatusServer,
            13 => RadiusCode::StatusClient,
            other => RadiusCode::Unknown(other),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            RadiusCode::AccessRequest | RadiusCode::AccountingRequest | RadiusCode::StatusServer | RadiusCode::StatusClient
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusAttribute {
    pub attribute_type: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusPacket {
    pub code: RadiusCode,
    pub identifier: u8,
    pub length: u16,
    pub authenticator: [u8; 16],
    pub attributes: Vec<RadiusAttribute>,
}

impl RadiusPacket {
    pub fn find_attribute(&self, attribute_type: u8) -> Option<&RadiusAttribute> {
        self.attributes.iter().find(|a| a.attribute_type == attribute_type)
    }

    pub fn user_name(&self) -> Option<String> {
        self.find_attribute(1).and_then(|a| String::from_utf8(a.value.clone()).ok())
    }
}

fn parse_attributes(w: &ByteWindow) -> Result<Vec<RadiusAttribute>, ParseOutcome> {
    let mut attributes = Vec::new();
    let mut offset = 0;
    while offset < w.len() {
        let attribute_type = w.read_u8(offset)?;
        let length = w.read_u8(offset + 1)? as usize;
        if length < 2 {
            return Err(ParseOutcome::InvalidFormat("RADIUS attribute length smaller than its own header"));
        }
        let value = w.sub(offset + 2, length - 2)?.as_slice().to_vec();
        attributes.push(RadiusAttribute { attribute_type, value });
        offset += length;
    }
    Ok(attributes)
}

fn parse_packet(window: &ByteWindow) -> Result<(RadiusPacket, usize), ParseOutcome> {
    if window.len() < HEADER_SIZE {
        return Err(ParseOutcome::BufferTooSmall);
    }
    let code = RadiusCode::from_u8(window.read_u8(0)?);
    let identifier = window.read_u8(1)?;
    let length = window.read_u16(2)?;
    if (length as usize) < HEADER_SIZE {
        return Err(ParseOutcome::InvalidFormat("RADIUS Length field smaller than header size"));
    }
    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(window.sub(4, 16)?.as_slice());

    let body = window.sub(HEADER_SIZE, length as usize - HEADER_SIZE)?;
    let attributes = parse_attributes(&body)?;

    Ok((
        RadiusPacket {
            code,
            identifier,
            length,
            authenticator,
            attributes,
        },
        length as usize,
    ))
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "RADIUS",
    protocol_id: 1812,
    min_header_size: HEADER_SIZE,
    min_message_size: HEADER_SIZE,
    max_message_size: 4096,
};

#[derive(Default)]
pub struct RadiusDissector {
    packets_seen: usize,
}

impl RadiusDissector {
    pub fn new() -> RadiusDissector {
        RadiusDissector::default()
    }
}

impl Dissector for RadiusDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        window.len() >= HEADER_SIZE
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let window = *context.window();
        match parse_packet(&window) {
            Ok((packet, consumed)) => {
                context.advance(consumed);
                self.packets_seen += 1;
                context.publish("radius_packet", Record::Radius(packet));
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
        self.packets_seen = 0;
    }

    fn progress(&self) -> f64 {
        if self.packets_seen > 0 {
            1.0
        } else {
            0.0
        }
    }
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register(crate::registry::ProtocolKey::Port(1812), || {
        Box::new(RadiusDissector::new())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access_request() -> Vec<u8> {
        let mut attrs = Vec::new();
        attrs.push(1); // User-Name
        attrs.push(2 + 5);
        attrs.extend_from_slice(b"alice");

        let length = HEADER_SIZE + attrs.len();
        let mut packet = vec![1, 42]; // Access-Request, id=42
        packet.extend_from_slice(&(length as u16).to_be_bytes());
        packet.extend_from_slice(&[0u8; 16]); // authenticator
        packet.extend_from_slice(&attrs);
        packet
    }

    #[test]
    fn parses_access_request_with_username() {
        let data = access_request();
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = RadiusDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("radius_packet").unwrap() {
            Record::Radius(p) => {
                assert_eq!(p.code, RadiusCode::AccessRequest);
                assert!(p.code.is_request());
                assert_eq!(p.identifier, 42);
                assert_eq!(p.user_name().as_deref(), Some("alice"));
            }
            _ => panic!("expected radius packet"),
        }
    }

    #[test]
    fn short_packet_is_too_small() {
        let data = [1, 42, 0, 5];
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = RadiusDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::BufferTooSmall);
    }

    #[test]
    fn attribute_length_below_minimum_is_invalid() {
        let mut packet = vec![1, 1];
        packet.extend_from_slice(&((HEADER_SIZE + 2) as u16).to_be_bytes());
        packet.extend_from_slice(&[0u8; 16]);
        packet.extend_from_slice(&[1, 1]); // length 1 is invalid (must be >= 2)
        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = RadiusDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }
}
