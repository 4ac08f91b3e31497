//! C7: ARP (RFC 826) — fixed 28-byte link/network decoder, plus a small
//! request/reply builder utility (the only packet-construction this crate does;
//! see spec.md Non-goals).

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

pub const HEADER_SIZE: usize = 28;

pub mod opcode {
    pub const REQUEST: u16 = 1;
    pub const REPLY: u16 = 2;
    pub const RARP_REQUEST: u16 = 3;
    pub const RARP_REPLY: u16 = 4;
}

pub mod hardware_type {
    pub const ETHERNET: u16 = 1;
    pub const IEEE802: u16 = 6;
    pub const ARCNET: u16 = 7;
    pub const FRAME_RELAY: u16 = 15;
    pub const ATM: u16 = 16;
    pub const HDLC: u16 = 17;
    pub const FIBRE_CHANNEL: u16 = 18;
}

pub mod protocol_type {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
}

pub type MacAddress = [u8; 6];
pub type Ipv4Address = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOpcode {
    Request,
    Reply,
    RArpRequest,
    RArpReply,
}

impl ArpOpcode {
    fn from_u16(v: u16) -> Option<ArpOpcode> {
        match v {
            opcode::REQUEST => Some(ArpOpcode::Request),
            opcode::REPLY => Some(ArpOpcode::Reply),
            opcode::RARP_REQUEST => Some(ArpOpcode::RArpRequest),
            opcode::RARP_REPLY => Some(ArpOpcode::RArpReply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArpRecord {
    pub hardware_type: u16,
    pub protocol_type: u16,
    pub hardware_length: u8,
    pub protocol_length: u8,
    pub opcode: ArpOpcode,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Address,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Address,
    /// Bytes beyond the fixed 28-byte header (padding on a minimum-size
    /// Ethernet frame, or genuine trailer data).
    pub extra_data: Vec<u8>,
}

impl ArpRecord {
    pub fn is_ethernet_arp(&self) -> bool {
        self.hardware_type == hardware_type::ETHERNET && self.hardware_length == 6
    }

    pub fn is_ipv4_arp(&self) -> bool {
        self.protocol_type == protocol_type::IPV4 && self.protocol_length == 4
    }
}

fn read_mac(w: &ByteWindow, offset: usize) -> Result<MacAddress, ParseOutcome> {
    let sub = w.sub(offset, 6)?;
    let mut mac = [0u8; 6];
    mac.copy_from_slice(sub.as_slice());
    Ok(mac)
}

fn read_ipv4(w: &ByteWindow, offset: usize) -> Result<Ipv4Address, ParseOutcome> {
    let sub = w.sub(offset, 4)?;
    let mut ip = [0u8; 4];
    ip.copy_from_slice(sub.as_slice());
    Ok(ip)
}

fn parse_record(w: &ByteWindow) -> Result<ArpRecord, ParseOutcome> {
    if w.len() < HEADER_SIZE {
        return Err(ParseOutcome::BufferTooSmall);
    }
    let hardware_type = w.read_u16(0)?;
    let protocol_type = w.read_u16(2)?;
    let hardware_length = w.read_u8(4)?;
    let protocol_length = w.read_u8(5)?;
    let opcode_raw = w.read_u16(6)?;

    if hardware_length == 0 || protocol_length == 0 {
        return Err(ParseOutcome::InvalidFormat("zero hardware/protocol address length"));
    }
    if hardware_type == hardware_type::ETHERNET && hardware_length != 6 {
        return Err(ParseOutcome::InvalidFormat("ethernet hardware type with wrong address length"));
    }
    if protocol_type == protocol_type::IPV4 && protocol_length != 4 {
        return Err(ParseOutcome::InvalidFormat("ipv4 protocol type with wrong address length"));
    }

    let opcode = ArpOpcode::from_u16(opcode_raw).ok_or(ParseOutcome::InvalidFormat("unknown arp opcode"))?;

    let sender_mac = read_mac(w, 8)?;
    let sender_ip = read_ipv4(w, 14)?;
    let target_mac = read_mac(w, 18)?;
    let target_ip = read_ipv4(w, 24)?;
    let extra_data = w.tail(HEADER_SIZE)?.as_slice().to_vec();

    Ok(ArpRecord {
        hardware_type,
        protocol_type,
        hardware_length,
        protocol_length,
        opcode,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
        extra_data,
    })
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "ARP",
    protocol_id: 0x0806,
    min_header_size: HEADER_SIZE,
    min_message_size: HEADER_SIZE,
    max_message_size: 1500,
};

#[derive(Default)]
pub struct ArpDissector {
    result: Option<ArpRecord>,
    done: bool,
}

impl ArpDissector {
    pub fn new() -> ArpDissector {
        ArpDissector::default()
    }

    pub fn result(&self) -> Option<&ArpRecord> {
        self.result.as_ref()
    }
}

impl Dissector for ArpDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        window.len() >= HEADER_SIZE && window.read_u16(6).map(|op| ArpOpcode::from_u16(op).is_some()).unwrap_or(false)
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        match parse_record(context.window()) {
            Ok(record) => {
                context.advance(HEADER_SIZE + record.extra_data.len());
                self.result = Some(record.clone());
                context.publish("arp_record", Record::Arp(record));
                context.set_stage(Stage::Complete);
                self.done = true;
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
        self.result = None;
        self.done = false;
    }

    fn progress(&self) -> f64 {
        if self.done {
            1.0
        } else {
            0.0
        }
    }
}

pub mod utils {
    use super::*;

    pub fn format_mac_address(mac: &MacAddress) -> String {
        mac.iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn parse_mac_address(s: &str) -> Option<MacAddress> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return None;
        }
        let mut mac = [0u8; 6];
        for (i, p) in parts.iter().enumerate() {
            mac[i] = u8::from_str_radix(p, 16).ok()?;
        }
        Some(mac)
    }

    pub fn format_ipv4_address(ip: &Ipv4Address) -> String {
        format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])
    }

    pub fn parse_ipv4_address(s: &str) -> Option<Ipv4Address> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 4 {
            return None;
        }
        let mut ip = [0u8; 4];
        for (i, p) in parts.iter().enumerate() {
            ip[i] = p.parse().ok()?;
        }
        Some(ip)
    }

    pub fn is_broadcast_mac(mac: &MacAddress) -> bool {
        mac.iter().all(|&b| b == 0xFF)
    }

    pub fn is_zero_mac(mac: &MacAddress) -> bool {
        mac.iter().all(|&b| b == 0)
    }

    pub fn is_zero_ip(ip: &Ipv4Address) -> bool {
        ip.iter().all(|&b| b == 0)
    }

    /// Serialises a well-formed Ethernet/IPv4 ARP request to a 28-byte buffer.
    pub fn create_arp_request(
        sender_mac: &MacAddress,
        sender_ip: &Ipv4Address,
        target_ip: &Ipv4Address,
    ) -> Vec<u8> {
        build(opcode::REQUEST, sender_mac, sender_ip, &[0u8; 6], target_ip)
    }

    /// Serialises a well-formed Ethernet/IPv4 ARP reply to a 28-byte buffer.
    pub fn create_arp_reply(
        sender_mac: &MacAddress,
        sender_ip: &Ipv4Address,
        target_mac: &MacAddress,
        target_ip: &Ipv4Address,
    ) -> Vec<u8> {
        build(opcode::REPLY, sender_mac, sender_ip, target_mac, target_ip)
    }

    fn build(
        op: u16,
        sender_mac: &MacAddress,
        sender_ip: &Ipv4Address,
        target_mac: &MacAddress,
        target_ip: &Ipv4Address,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&hardware_type::ETHERNET.to_be_bytes());
        buf.extend_from_slice(&protocol_type::IPV4.to_be_bytes());
        buf.push(6);
        buf.push(4);
        buf.extend_from_slice(&op.to_be_bytes());
        buf.extend_from_slice(sender_mac);
        buf.extend_from_slice(sender_ip);
        buf.extend_from_slice(target_mac);
        buf.extend_from_slice(target_ip);
        buf
    }
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register(
        crate::registry::ProtocolKey::EtherType(0x0806),
        || Box::new(ArpDissector::new()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_bytes() -> Vec<u8> {
        vec![
            0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
            0xc0, 0xa8, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0xa8, 0x01, 0x02,
        ]
    }

    #[test]
    fn parses_literal_arp_request() {
        let buf = request_bytes();
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = ArpDissector::new();
        assert!(d.probe(&w));
        let outcome = d.parse(&mut ctx);
        assert_eq!(outcome, ParseOutcome::Success);
        let record = d.result().unwrap();
        assert_eq!(record.opcode, ArpOpcode::Request);
        assert_eq!(utils::format_mac_address(&record.sender_mac), "aa:bb:cc:dd:ee:ff");
        assert_eq!(utils::format_ipv4_address(&record.sender_ip), "192.168.1.1");
        assert_eq!(utils::format_ipv4_address(&record.target_ip), "192.168.1.2");
    }

    #[test]
    fn truncated_request_needs_more_data() {
        let mut buf = request_bytes();
        buf.pop();
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = ArpDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::NeedMoreData);
    }

    #[test]
    fn trailing_byte_captured_as_extra_data() {
        let mut buf = request_bytes();
        buf.push(0xAB);
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = ArpDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        assert_eq!(d.result().unwrap().extra_data, vec![0xAB]);
    }

    #[test]
    fn round_trips_through_builder() {
        let sender_mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        let sender_ip = [10, 0, 0, 1];
        let target_ip = [10, 0, 0, 2];
        let bytes = utils::create_arp_request(&sender_mac, &sender_ip, &target_ip);
        let w = ByteWindow::new(&bytes);
        let mut ctx = ParseContext::new(w);
        let mut d = ArpDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        let record = d.result().unwrap();
        assert_eq!(record.opcode, ArpOpcode::Request);
        assert_eq!(record.sender_mac, sender_mac);
        assert_eq!(record.sender_ip, sender_ip);
        assert_eq!(record.target_ip, target_ip);
    }

    #[test]
    fn mac_and_ip_string_round_trip() {
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        assert_eq!(utils::parse_mac_address(&utils::format_mac_address(&mac)), Some(mac));
        let ip = [192, 168, 1, 1];
        assert_eq!(utils::parse_ipv4_address(&utils::format_ipv4_address(&ip)), Some(ip));
    }

    #[test]
    fn zero_length_fields_rejected() {
        let mut buf = request_bytes();
        buf[4] = 0;
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = ArpDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }
}
