//! C8: MQTT (v3.1.1 and v5) — fixed header, variable-length remaining-length,
//! and the fifteen control packet types.

use std::collections::HashMap;

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::util::{read_utf8_string, read_varint};
use crate::window::ByteWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
    Auth,
}

impl PacketType {
    fn from_u8(v: u8) -> Result<PacketType, ParseOutcome> {
        match v {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            15 => Ok(PacketType::Auth),
            other => Err(ParseOutcome::InvalidFormat(mqtt_type_error(other))),
        }
    }
}

fn mqtt_type_error(_v: u8) -> &'static str {
    "unknown MQTT control packet type"
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectFlags {
    pub clean_session: bool,
    pub will_flag: bool,
    pub will_qos: u8,
    pub will_retain: bool,
    pub password_flag: bool,
    pub username_flag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub flags: ConnectFlags,
    pub keep_alive: u16,
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_message: Option<Vec<u8>>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub properties: HashMap<u8, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: String,
    pub packet_id: Option<u16>,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
    pub payload: Vec<u8>,
    pub properties: HashMap<u8, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub packet_id: u16,
    pub topic_filters: Vec<(String, u8)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttPacket {
    Connect(ConnectPacket),
    ConnAck { session_present: bool, return_code: u8 },
    Publish(PublishPacket),
    PubAck { packet_id: u16 },
    PubRec { packet_id: u16 },
    PubRel { packet_id: u16 },
    PubComp { packet_id: u16 },
    Subscribe(SubscribeRequest),
    SubAck { packet_id: u16, return_codes: Vec<u8> },
    Unsubscribe { packet_id: u16, topic_filters: Vec<String> },
    UnsubAck { packet_id: u16 },
    PingReq,
    PingResp,
    Disconnect { reason_code: u8 },
    Auth { reason_code: u8 },
}

/// MQTT v5 property blocks are themselves a varint-prefixed run of
/// identifier/value pairs; we keep the raw value bytes rather than decoding
/// every one of the ~40 property types, since only the identifier space is
/// invariant across them.
fn read_properties(w: &ByteWindow, offset: usize) -> Result<(HashMap<u8, Vec<u8>>, usize), ParseOutcome> {
    let (prop_len, len_size) = read_varint(w, offset)?;
    let mut props = HashMap::new();
    let mut pos = offset + len_size;
    let end = pos + prop_len as usize;
    while pos < end {
        let id = w.read_u8(pos)?;
        pos += 1;
        let value = match id {
            // Byte properties
            0x01 | 0x17 | 0x19 | 0x24 | 0x25 | 0x28 | 0x29 | 0x2A => {
                let v = vec![w.read_u8(pos)?];
                pos += 1;
                v
            }
            // Two-byte integer properties
            0x13 | 0x21 | 0x22 => {
                let v = w.read_u16(pos)?.to_be_bytes().to_vec();
                pos += 2;
                v
            }
            // Four-byte integer properties
            0x02 | 0x11 | 0x18 | 0x27 => {
                let v = w.read_u32(pos)?.to_be_bytes().to_vec();
                pos += 4;
                v
            }
            // Variable byte integer (subscription identifier)
            0x0B => {
                let (value, size) = read_varint(w, pos)?;
                pos += size;
                value.to_be_bytes().to_vec()
            }
            // UTF-8 string / binary data properties
            _ => {
                let (s, size) = read_utf8_string(w, pos)?;
                pos += size;
                s.into_bytes()
            }
        };
        props.insert(id, value);
    }
    Ok((props, end - offset))
}

fn parse_connect(w: &ByteWindow) -> Result<ConnectPacket, ParseOutcome> {
    let (protocol_name, mut offset) = read_utf8_string(w, 0)?;
    let protocol_level = w.read_u8(offset)?;
    offset += 1;
    let flag_byte = w.read_u8(offset)?;
    offset += 1;
    if flag_byte & 0x01 != 0 {
        return Err(ParseOutcome::InvalidFormat("MQTT CONNECT reserved flag bit must be zero"));
    }
    let flags = ConnectFlags {
        clean_session: flag_byte & 0x02 != 0,
        will_flag: flag_byte & 0x04 != 0,
        will_qos: (flag_byte >> 3) & 0x03,
        will_retain: flag_byte & 0x20 != 0,
        password_flag: flag_byte & 0x40 != 0,
        username_flag: flag_byte & 0x80 != 0,
    };
    let keep_alive = w.read_u16(offset)?;
    offset += 2;

    let properties = if protocol_level >= 5 {
        let (props, size) = read_properties(w, offset)?;
        offset += size;
        props
    } else {
        HashMap::new()
    };

    let (client_id, size) = read_utf8_string(w, offset)?;
    offset += size;

    let mut will_topic = None;
    let mut will_message = None;
    if flags.will_flag {
        if protocol_level >= 5 {
            let (_props, size) = read_properties(w, offset)?;
            offset += size;
        }
        let (topic, size) = read_utf8_string(w, offset)?;
        offset += size;
        let (msg, size) = crate::util::read_length_prefixed_bytes(w, offset)?;
        offset += size;
        will_topic = Some(topic);
        will_message = Some(msg.to_vec());
    }

    let username = if flags.username_flag {
        let (u, size) = read_utf8_string(w, offset)?;
        offset += size;
        Some(u)
    } else {
        None
    };

    let password = if flags.password_flag {
        let (p, size) = crate::util::read_length_prefixed_bytes(w, offset)?;
        offset += size;
        Some(p.to_vec())
    } else {
        None
    };

    Ok(ConnectPacket {
        protocol_name,
        protocol_level,
        flags,
        keep_alive,
        client_id,
        will_topic,
        will_message,
        username,
        password,
        properties,
    })
}

/// A PUBLISH topic: non-empty, no NUL, at most 65535 bytes, and none of the
/// filter-only wildcard tokens `+`/`#` (these are legal only in a filter).
fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= 65535
        && !topic.bytes().any(|b| b == 0 || b == b'+' || b == b'#')
}

/// A SUBSCRIBE/UNSUBSCRIBE topic filter: non-empty, no NUL, at most 65535
/// bytes; `+` may stand for exactly one whole path segment and `#` may stand
/// for the remainder of the filter but only as its last segment.
fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > 65535 || filter.bytes().any(|b| b == 0) {
        return false;
    }
    let segments: Vec<&str> = filter.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        if segment.contains('#') && (*segment != "#" || !is_last) {
            return false;
        }
        if segment.contains('+') && *segment != "+" {
            return false;
        }
    }
    true
}

fn parse_publish(w: &ByteWindow, qos: u8, retain: bool, dup: bool, body_len: usize) -> Result<PublishPacket, ParseOutcome> {
    let (topic, mut offset) = read_utf8_string(w, 0)?;
    if !is_valid_topic(&topic) {
        return Err(ParseOutcome::InvalidFormat("MQTT PUBLISH topic is empty, too long, or contains a wildcard"));
    }
    let packet_id = if qos > 0 {
        let id = w.read_u16(offset)?;
        offset += 2;
        Some(id)
    } else {
        None
    };
    // MQTT v5 properties are optional and indistinguishable from a v3.1.1
    // payload by format alone; we treat everything after the variable header
    // as payload, which matches v3.1.1 semantics and is a safe default for v5
    // streams with no properties.
    let properties = HashMap::new();
    if offset > body_len {
        return Err(ParseOutcome::NeedMoreData);
    }
    let payload = w.sub(offset, body_len - offset)?.as_slice().to_vec();
    Ok(PublishPacket {
        topic,
        packet_id,
        qos,
        retain,
        dup,
        payload,
        properties,
    })
}

fn parse_subscribe(w: &ByteWindow, body_len: usize) -> Result<SubscribeRequest, ParseOutcome> {
    let packet_id = w.read_u16(0)?;
    let mut offset = 2;
    let mut topic_filters = Vec::new();
    while offset < body_len {
        let (topic, size) = read_utf8_string(w, offset)?;
        offset += size;
        if !is_valid_topic_filter(&topic) {
            return Err(ParseOutcome::InvalidFormat("MQTT SUBSCRIBE topic filter is malformed"));
        }
        let qos = w.read_u8(offset)? & 0x03;
        offset += 1;
        topic_filters.push((topic, qos));
    }
    Ok(SubscribeRequest { packet_id, topic_filters })
}

fn parse_body(packet_type: PacketType, flags: u8, w: &ByteWindow, body_len: usize) -> Result<MqttPacket, ParseOutcome> {
    match packet_type {
        PacketType::Connect => Ok(MqttPacket::Connect(parse_connect(w)?)),
        PacketType::ConnAck => Ok(MqttPacket::ConnAck {
            session_present: w.read_u8(0)? & 0x01 != 0,
            return_code: w.read_u8(1)?,
        }),
        PacketType::Publish => {
            let qos = (flags >> 1) & 0x03;
            let retain = flags & 0x01 != 0;
            let dup = flags & 0x08 != 0;
            if qos > 2 {
                return Err(ParseOutcome::InvalidFormat("MQTT PUBLISH QoS must be 0, 1, or 2"));
            }
            Ok(MqttPacket::Publish(parse_publish(w, qos, retain, dup, body_len)?))
        }
        PacketType::PubAck => Ok(MqttPacket::PubAck { packet_id: w.read_u16(0)? }),
        PacketType::PubRec => Ok(MqttPacket::PubRec { packet_id: w.read_u16(0)? }),
        PacketType::PubRel => Ok(MqttPacket::PubRel { packet_id: w.read_u16(0)? }),
        PacketType::PubComp => Ok(MqttPacket::PubComp { packet_id: w.read_u16(0)? }),
        PacketType::Subscribe => Ok(MqttPacket::Subscribe(parse_subscribe(w, body_len)?)),
        PacketType::SubAck => {
            let packet_id = w.read_u16(0)?;
            let return_codes = w.sub(2, body_len - 2)?.as_slice().to_vec();
            Ok(MqttPacket::SubAck { packet_id, return_codes })
        }
        PacketType::Unsubscribe => {
            let packet_id = w.read_u16(0)?;
            let mut offset = 2;
            let mut topic_filters = Vec::new();
            while offset < body_len {
                let (topic, size) = read_utf8_string(w, offset)?;
                offset += size;
                if !is_valid_topic_filter(&topic) {
                    return Err(ParseOutcome::InvalidFormat("MQTT UNSUBSCRIBE topic filter is malformed"));
                }
                topic_filters.push(topic);
            }
            Ok(MqttPacket::Unsubscribe { packet_id, topic_filters })
        }
        PacketType::UnsubAck => Ok(MqttPacket::UnsubAck { packet_id: w.read_u16(0)? }),
        PacketType::PingReq => Ok(MqttPacket::PingReq),
        PacketType::PingResp => Ok(MqttPacket::PingResp),
        PacketType::Disconnect => {
            let reason_code = if body_len > 0 { w.read_u8(0)? } else { 0 };
            Ok(MqttPacket::Disconnect { reason_code })
        }
        PacketType::Auth => {
            let reason_code = if body_len > 0 { w.read_u8(0)? } else { 0 };
            Ok(MqttPacket::Auth { reason_code })
        }
    }
}

fn parse_packet(window: &ByteWindow) -> Result<(MqttPacket, usize), ParseOutcome> {
    let b0 = window.read_u8(0)?;
    let packet_type = PacketType::from_u8(b0 >> 4)?;
    let flags = b0 & 0x0F;
    let (remaining_length, len_size) = read_varint(window, 1)?;
    let header_size = 1 + len_size;
    let body = window.sub(header_size, remaining_length as usize)?;
    let packet = parse_body(packet_type, flags, &body, remaining_length as usize)?;
    Ok((packet, header_size + remaining_length as usize))
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "MQTT",
    protocol_id: 1883,
    min_header_size: 2,
    min_message_size: 2,
    max_message_size: 268_435_455 + 5,
};

#[derive(Default)]
pub struct MqttDissector {
    packets_seen: usize,
}

impl MqttDissector {
    pub fn new() -> MqttDissector {
        MqttDissector::default()
    }
}

impl Dissector for MqttDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        if window.is_empty() {
            return false;
        }
        let b0 = match window.read_u8(0) {
            Ok(b) => b,
            Err(_) => return false,
        };
        PacketType::from_u8(b0 >> 4).is_ok()
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let window = *context.window();
        match parse_packet(&window) {
            Ok((packet, consumed)) => {
                context.advance(consumed);
                self.packets_seen += 1;
                trace!("parsed mqtt packet #{}, {} bytes consumed", self.packets_seen, consumed);
                context.publish("mqtt_packet", Record::Mqtt(packet));
                context.set_stage(Stage::Complete);
                ParseOutcome::Success
            }
            Err(outcome) => {
                if !outcome.is_recoverable() {
                    debug!("mqtt parse failed: {}", outcome);
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
    registry.register(crate::registry::ProtocolKey::Port(1883), || {
        Box::new(MqttDissector::new())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_packet_v311() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x00, 0x04]);
        body.extend_from_slice(b"MQTT");
        body.push(4); // protocol level
        body.push(0x02); // clean session
        body.extend_from_slice(&[0x00, 0x3C]); // keep alive 60
        body.extend_from_slice(&[0x00, 0x03]);
        body.extend_from_slice(b"cli");

        let mut packet = vec![0x10]; // CONNECT, flags 0
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);
        packet
    }

    #[test]
    fn parses_connect_packet() {
        let data = connect_packet_v311();
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("mqtt_packet").unwrap() {
            Record::Mqtt(MqttPacket::Connect(c)) => {
                assert_eq!(c.protocol_name, "MQTT");
                assert_eq!(c.protocol_level, 4);
                assert!(c.flags.clean_session);
                assert_eq!(c.client_id, "cli");
                assert_eq!(c.keep_alive, 60);
            }
            _ => panic!("expected connect"),
        }
    }

    #[test]
    fn parses_publish_qos0() {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x00, 0x04]);
        body.extend_from_slice(b"test");
        body.extend_from_slice(b"payload");
        let mut packet = vec![0x30]; // PUBLISH, qos0
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);

        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("mqtt_packet").unwrap() {
            Record::Mqtt(MqttPacket::Publish(p)) => {
                assert_eq!(p.topic, "test");
                assert_eq!(p.packet_id, None);
                assert_eq!(p.payload, b"payload");
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn publish_qos_gt2_is_invalid() {
        let mut packet = vec![0x36]; // qos = 3 (invalid)
        packet.push(0);
        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }

    #[test]
    fn pingreq_and_pingresp() {
        let data = [0xC0, 0x00];
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        assert_eq!(ctx.get("mqtt_packet"), Some(&Record::Mqtt(MqttPacket::PingReq)));
    }

    #[test]
    fn subscribe_multiple_filters() {
        let mut body = vec![0x00, 0x0A]; // packet id 10
        body.extend_from_slice(&[0x00, 0x03]);
        body.extend_from_slice(b"a/b");
        body.push(0x01);
        body.extend_from_slice(&[0x00, 0x01]);
        body.extend_from_slice(b"c");
        body.push(0x00);
        let mut packet = vec![0x82]; // SUBSCRIBE (flags must be 0b0010)
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);

        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("mqtt_packet").unwrap() {
            Record::Mqtt(MqttPacket::Subscribe(s)) => {
                assert_eq!(s.packet_id, 10);
                assert_eq!(s.topic_filters, vec![("a/b".to_string(), 1), ("c".to_string(), 0)]);
            }
            _ => panic!("expected subscribe"),
        }
    }

    #[test]
    fn publish_with_wildcard_topic_is_invalid() {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x00, 0x03]);
        body.extend_from_slice(b"a/#");
        let mut packet = vec![0x30];
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);

        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }

    #[test]
    fn publish_with_empty_topic_is_invalid() {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x00, 0x00]);
        body.extend_from_slice(b"payload");
        let mut packet = vec![0x30];
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);

        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }

    #[test]
    fn subscribe_accepts_wildcard_filters() {
        let mut body = vec![0x00, 0x0A];
        body.extend_from_slice(&[0x00, 0x05]);
        body.extend_from_slice(b"a/+/b");
        body.push(0x00);
        body.extend_from_slice(&[0x00, 0x05]);
        body.extend_from_slice(b"a/b/#");
        body.push(0x01);
        let mut packet = vec![0x82];
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);

        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("mqtt_packet").unwrap() {
            Record::Mqtt(MqttPacket::Subscribe(s)) => {
                assert_eq!(s.topic_filters, vec![("a/+/b".to_string(), 0), ("a/b/#".to_string(), 1)]);
            }
            _ => panic!("expected subscribe"),
        }
    }

    #[test]
    fn subscribe_rejects_hash_not_in_last_segment() {
        let mut body = vec![0x00, 0x0A];
        body.extend_from_slice(&[0x00, 0x05]);
        body.extend_from_slice(b"a/#/b");
        body.push(0x00);
        let mut packet = vec![0x82];
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);

        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }

    #[test]
    fn unsubscribe_rejects_malformed_filter() {
        let mut body = vec![0x00, 0x0B];
        body.extend_from_slice(&[0x00, 0x04]);
        body.extend_from_slice(b"a+/b");
        let mut packet = vec![0xA2];
        packet.push(body.len() as u8);
        packet.extend_from_slice(&body);

        let w = ByteWindow::new(&packet);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }

    #[test]
    fn unknown_packet_type_is_invalid_format() {
        let data = [0x00, 0x00]; // type nibble 0 is reserved, unused
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = MqttDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }
}
