//! GTPv2-C (3GPP TS 29.274) — variable header (TEID optional) followed by a
//! run of type-length-instance-value information elements.

use std::convert::TryInto;

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gtpv2Header {
    pub version: u8,
    pub piggybacking: bool,
    pub teid_present: bool,
    pub message_type: u8,
    pub message_length: u16,
    pub teid: Option<u32>,
    pub sequence_number: u32,
}

/// IE type values used by this dissector (3GPP TS 29.274 table 8.1-1).
pub mod ie_type {
    pub const IMSI: u8 = 1;
    pub const CAUSE: u8 = 2;
    pub const APN: u8 = 71;
    pub const EBI: u8 = 73;
    pub const BEARER_QOS: u8 = 81;
    pub const BEARER_CONTEXT: u8 = 87;
    pub const FTEID: u8 = 127;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gtpv2InformationElement {
    pub ie_type: u8,
    pub instance: u8,
    pub value: Vec<u8>,
}

/// A Fully Qualified TEID (3GPP TS 29.274 §8.22): interface identity plus an
/// IPv4 and/or IPv6 address, whichever presence bits are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FTeid {
    pub interface_type: u8,
    pub teid: u32,
    pub ipv4_address: Option<[u8; 4]>,
    pub ipv6_address: Option<[u8; 16]>,
}

/// An EPS Bearer QoS profile (3GPP TS 29.274 §8.15). Bitrates are bits per
/// second, decoded from the wire's 5-octet fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BearerQos {
    pub qci: u8,
    pub mbr_uplink: u64,
    pub mbr_downlink: u64,
    pub gbr_uplink: u64,
    pub gbr_downlink: u64,
}

/// A grouped Bearer Context IE (3GPP TS 29.274 §8.28): a nested run of IEs
/// carrying one bearer's identity, F-TEID(s), and QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerContext {
    pub ebi: Option<u8>,
    pub s1_u_enodeb_fteid: Option<FTeid>,
    pub s1_u_sgw_fteid: Option<FTeid>,
    pub qos: Option<BearerQos>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gtpv2Message {
    pub header: Gtpv2Header,
    pub information_elements: Vec<Gtpv2InformationElement>,
}

impl Gtpv2Message {
    pub fn find_ie(&self, ie_type: u8) -> Option<&Gtpv2InformationElement> {
        self.information_elements.iter().find(|ie| ie.ie_type == ie_type)
    }

    pub fn cause(&self) -> Option<u8> {
        self.find_ie(ie_type::CAUSE).and_then(|ie| ie.value.first().copied())
    }

    pub fn is_echo(&self) -> bool {
        matches!(self.header.message_type, 1 | 2)
    }

    /// The subscriber IMSI, TBCD-decoded into its decimal digit string.
    pub fn imsi(&self) -> Option<String> {
        self.find_ie(ie_type::IMSI).map(|ie| decode_tbcd(&ie.value))
    }

    /// The Access Point Name, dot-joined from its length-prefixed labels.
    pub fn apn(&self) -> Option<String> {
        self.find_ie(ie_type::APN).map(|ie| decode_apn(&ie.value))
    }

    /// The top-level F-TEID, if this message carries one outside a bearer context.
    pub fn fteid(&self) -> Option<FTeid> {
        self.find_ie(ie_type::FTEID).and_then(|ie| decode_fteid(&ie.value))
    }

    pub fn bearer_qos(&self) -> Option<BearerQos> {
        self.find_ie(ie_type::BEARER_QOS).and_then(|ie| decode_bearer_qos(&ie.value))
    }

    /// Every Bearer Context grouped IE, decoded recursively.
    pub fn bearer_contexts(&self) -> Vec<BearerContext> {
        self.information_elements
            .iter()
            .filter(|ie| ie.ie_type == ie_type::BEARER_CONTEXT)
            .map(|ie| decode_bearer_context(&ie.value))
            .collect()
    }
}

/// TBCD (Telephony Binary Coded Decimal): low nibble first, then high
/// nibble, per digit byte; a trailing 0xF nibble is filler on an odd-length
/// number and is dropped.
fn decode_tbcd(value: &[u8]) -> String {
    let mut digits = String::with_capacity(value.len() * 2);
    for &byte in value {
        let low = byte & 0x0F;
        let high = byte >> 4;
        if low <= 9 {
            digits.push((b'0' + low) as char);
        }
        if high <= 9 {
            digits.push((b'0' + high) as char);
        }
    }
    digits
}

/// An Access Point Name is a run of length-prefixed ASCII labels (no DNS-style
/// compression pointers), joined with '.'.
fn decode_apn(value: &[u8]) -> String {
    let mut labels = Vec::new();
    let mut offset = 0;
    while offset < value.len() {
        let len = value[offset] as usize;
        offset += 1;
        let end = (offset + len).min(value.len());
        labels.push(String::from_utf8_lossy(&value[offset..end]).into_owned());
        offset = end;
    }
    labels.join(".")
}

fn decode_fteid(value: &[u8]) -> Option<FTeid> {
    if value.len() < 5 {
        return None;
    }
    let flags = value[0];
    let ipv4_present = flags & 0x80 != 0;
    let ipv6_present = flags & 0x40 != 0;
    let interface_type = flags & 0x3F;
    let teid = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);

    let mut offset = 5;
    let ipv4_address = if ipv4_present {
        let addr: [u8; 4] = value.get(offset..offset + 4)?.try_into().ok()?;
        offset += 4;
        Some(addr)
    } else {
        None
    };
    let ipv6_address = if ipv6_present {
        let addr: [u8; 16] = value.get(offset..offset + 16)?.try_into().ok()?;
        Some(addr)
    } else {
        None
    };

    Some(FTeid { interface_type, teid, ipv4_address, ipv6_address })
}

/// A 5-octet (40-bit) big-endian bitrate field, as used throughout TS 29.274 §8.15.
fn decode_bitrate5(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn decode_bearer_qos(value: &[u8]) -> Option<BearerQos> {
    // 1 spare/PCI/PL/PVI octet, 1 QCI octet, then MBR-UL/MBR-DL/GBR-UL/GBR-DL
    // as four 5-octet fields.
    if value.len() < 22 {
        return None;
    }
    let qci = value[1];
    let mbr_uplink = decode_bitrate5(&value[2..7]);
    let mbr_downlink = decode_bitrate5(&value[7..12]);
    let gbr_uplink = decode_bitrate5(&value[12..17]);
    let gbr_downlink = decode_bitrate5(&value[17..22]);
    Some(BearerQos { qci, mbr_uplink, mbr_downlink, gbr_uplink, gbr_downlink })
}

fn decode_bearer_context(value: &[u8]) -> BearerContext {
    let mut ebi = None;
    let mut s1_u_enodeb_fteid = None;
    let mut s1_u_sgw_fteid = None;
    let mut qos = None;

    let window = ByteWindow::new(value);
    if let Ok(ies) = parse_ies(&window) {
        for ie in &ies {
            match ie.ie_type {
                ie_type::EBI => ebi = ie.value.first().copied(),
                ie_type::FTEID => {
                    // Instance 0 is conventionally the eNodeB-side F-TEID,
                    // instance 1+ the SGW-side one (TS 29.274 table 7.2.2-1).
                    let fteid = decode_fteid(&ie.value);
                    if ie.instance == 0 {
                        s1_u_enodeb_fteid = fteid.or(s1_u_enodeb_fteid);
                    } else {
                        s1_u_sgw_fteid = fteid.or(s1_u_sgw_fteid);
                    }
                }
                ie_type::BEARER_QOS => qos = decode_bearer_qos(&ie.value),
                _ => {}
            }
        }
    }

    BearerContext { ebi, s1_u_enodeb_fteid, s1_u_sgw_fteid, qos }
}

fn parse_header(w: &ByteWindow) -> Result<(Gtpv2Header, usize), ParseOutcome> {
    let flags = w.read_u8(0)?;
    let version = flags >> 5;
    if version != 2 {
        return Err(ParseOutcome::UnsupportedVersion);
    }
    let piggybacking = flags & 0x10 != 0;
    let teid_present = flags & 0x08 != 0;
    let message_type = w.read_u8(1)?;
    let message_length = w.read_u16(2)?;

    let mut offset = 4;
    let teid = if teid_present {
        let t = w.read_u32(offset)?;
        offset += 4;
        Some(t)
    } else {
        None
    };
    let seq_and_spare = w.read_u32(offset)?;
    let sequence_number = seq_and_spare >> 8;
    offset += 4;

    Ok((
        Gtpv2Header {
            version,
            piggybacking,
            teid_present,
            message_type,
            message_length,
            teid,
            sequence_number,
        },
        offset,
    ))
}

fn parse_ies(w: &ByteWindow) -> Result<Vec<Gtpv2InformationElement>, ParseOutcome> {
    let mut ies = Vec::new();
    let mut offset = 0;
    while offset < w.len() {
        let ie_type = w.read_u8(offset)?;
        let length = w.read_u16(offset + 1)? as usize;
        let instance = w.read_u8(offset + 3)? & 0x0F;
        let value = w.sub(offset + 4, length)?.as_slice().to_vec();
        ies.push(Gtpv2InformationElement { ie_type, instance, value });
        offset += 4 + length;
    }
    Ok(ies)
}

fn parse_message(window: &ByteWindow) -> Result<(Gtpv2Message, usize), ParseOutcome> {
    if window.len() < 4 {
        return Err(ParseOutcome::BufferTooSmall);
    }
    let (header, header_size) = parse_header(window)?;
    // message_length counts everything after the first 4 bytes of the header.
    let total_len = 4 + header.message_length as usize;
    let body = window.sub(header_size, total_len.saturating_sub(header_size))?;
    let information_elements = parse_ies(&body)?;
    Ok((Gtpv2Message { header, information_elements }, total_len))
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "GTPv2-C",
    protocol_id: 2123,
    min_header_size: 8,
    min_message_size: 8,
    max_message_size: 65535,
};

#[derive(Default)]
pub struct Gtpv2Dissector {
    messages_seen: usize,
}

impl Gtpv2Dissector {
    pub fn new() -> Gtpv2Dissector {
        Gtpv2Dissector::default()
    }
}

impl Dissector for Gtpv2Dissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        window.len() >= 4 && window.read_u8(0).map(|b| b >> 5 == 2).unwrap_or(false)
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let window = *context.window();
        match parse_message(&window) {
            Ok((message, consumed)) => {
                context.advance(consumed);
                self.messages_seen += 1;
                context.publish("gtpv2_message", Record::Gtpv2(message));
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
    registry.register(crate::registry::ProtocolKey::Port(2123), || {
        Box::new(Gtpv2Dissector::new())
    });
}
