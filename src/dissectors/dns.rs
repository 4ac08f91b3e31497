//! C8: DNS (RFC 1035), including message compression.

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::util::read_domain_name;
use crate::window::ByteWindow;

pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsResourceRecord {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsResourceRecord>,
    pub authority: Vec<DnsResourceRecord>,
    pub additional: Vec<DnsResourceRecord>,
}

impl DnsMessage {
    pub fn is_query(&self) -> bool {
        self.header.flags & 0x8000 == 0
    }

    pub fn is_response(&self) -> bool {
        !self.is_query()
    }

    pub fn response_code(&self) -> u8 {
        (self.header.flags & 0x000F) as u8
    }

    pub fn recursion_desired(&self) -> bool {
        self.header.flags & 0x0100 != 0
    }

    pub fn recursion_available(&self) -> bool {
        self.header.flags & 0x0080 != 0
    }

    pub fn authoritative(&self) -> bool {
        self.header.flags & 0x0400 != 0
    }

    pub fn truncated(&self) -> bool {
        self.header.flags & 0x0200 != 0
    }
}

fn parse_header(w: &ByteWindow) -> Result<DnsHeader, ParseOutcome> {
    Ok(DnsHeader {
        id: w.read_u16(0)?,
        flags: w.read_u16(2)?,
        qdcount: w.read_u16(4)?,
        ancount: w.read_u16(6)?,
        nscount: w.read_u16(8)?,
        arcount: w.read_u16(10)?,
    })
}

fn parse_question(message: &[u8], offset: &mut usize) -> Result<DnsQuestion, ParseOutcome> {
    let (qname, consumed) = read_domain_name(message, *offset)?;
    *offset += consumed;
    let w = ByteWindow::new(message);
    let qtype = w.read_u16(*offset)?;
    let qclass = w.read_u16(*offset + 2)?;
    *offset += 4;
    Ok(DnsQuestion { qname, qtype, qclass })
}

fn parse_resource_record(message: &[u8], offset: &mut usize) -> Result<DnsResourceRecord, ParseOutcome> {
    let (name, consumed) = read_domain_name(message, *offset)?;
    *offset += consumed;
    let w = ByteWindow::new(message);
    let rtype = w.read_u16(*offset)?;
    let rclass = w.read_u16(*offset + 2)?;
    let ttl = w.read_u32(*offset + 4)?;
    let rdlength = w.read_u16(*offset + 8)? as usize;
    *offset += 10;
    if *offset + rdlength > message.len() {
        return Err(ParseOutcome::NeedMoreData);
    }
    let rdata = message[*offset..*offset + rdlength].to_vec();
    *offset += rdlength;
    Ok(DnsResourceRecord {
        name,
        rtype,
        rclass,
        ttl,
        rdata,
    })
}

fn parse_message(message: &[u8]) -> Result<DnsMessage, ParseOutcome> {
    if message.len() < HEADER_SIZE {
        return Err(ParseOutcome::BufferTooSmall);
    }
    let w = ByteWindow::new(message);
    let header = parse_header(&w)?;
    let mut offset = HEADER_SIZE;

    let mut questions = Vec::with_capacity(header.qdcount as usize);
    for _ in 0..header.qdcount {
        questions.push(parse_question(message, &mut offset)?);
    }

    let mut answers = Vec::with_capacity(header.ancount as usize);
    for _ in 0..header.ancount {
        answers.push(parse_resource_record(message, &mut offset)?);
    }

    let mut authority = Vec::with_capacity(header.nscount as usize);
    for _ in 0..header.nscount {
        authority.push(parse_resource_record(message, &mut offset)?);
    }

    let mut additional = Vec::with_capacity(header.arcount as usize);
    for _ in 0..header.arcount {
        additional.push(parse_resource_record(message, &mut offset)?);
    }

    Ok(DnsMessage {
        header,
        questions,
        answers,
        authority,
        additional,
    })
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "DNS",
    protocol_id: 53,
    min_header_size: HEADER_SIZE,
    min_message_size: HEADER_SIZE,
    max_message_size: 65535,
};

#[derive(Default)]
pub struct DnsDissector {
    result: Option<DnsMessage>,
}

impl DnsDissector {
    pub fn new() -> DnsDissector {
        DnsDissector::default()
    }

    pub fn result(&self) -> Option<&DnsMessage> {
        self.result.as_ref()
    }
}

impl Dissector for DnsDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        // DNS has no magic number; a cheap sanity check is that the section
        // counts are at least plausible against the buffer length.
        window.len() >= HEADER_SIZE
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        match parse_message(context.window().as_slice()) {
            Ok(message) => {
                context.advance(context.window().len());
                self.result = Some(message.clone());
                context.publish("dns_message", Record::Dns(message));
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
        self.result = None;
    }

    fn progress(&self) -> f64 {
        if self.result.is_some() {
            1.0
        } else {
            0.0
        }
    }
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register(crate::registry::ProtocolKey::Port(53), || {
        Box::new(DnsDissector::new())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_www_example_com() -> Vec<u8> {
        let mut buf = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        buf.push(3);
        buf.extend_from_slice(b"www");
        buf.push(7);
        buf.extend_from_slice(b"example");
        buf.push(3);
        buf.extend_from_slice(b"com");
        buf.push(0);
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        buf
    }

    #[test]
    fn parses_literal_query() {
        let buf = query_www_example_com();
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = DnsDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        let msg = d.result().unwrap();
        assert!(msg.is_query());
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(msg.questions[0].qname, "www.example.com");
        assert_eq!(msg.questions[0].qtype, 1);
        assert_eq!(msg.questions[0].qclass, 1);
        assert!(msg.recursion_desired());
    }

    #[test]
    fn truncated_query_fails() {
        let mut buf = query_www_example_com();
        buf.truncate(buf.len() - 1);
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = DnsDissector::new();
        let outcome = d.parse(&mut ctx);
        assert_ne!(outcome, ParseOutcome::Success);
    }

    #[test]
    fn response_with_compressed_name() {
        let mut buf = query_www_example_com();
        buf[2] = 0x81;
        buf[3] = 0x80;
        buf[6] = 0x00;
        buf[7] = 0x01; // ancount = 1
                       // Answer: pointer to offset 12 (start of qname), type A, class IN, ttl, rdlength 4, rdata
        buf.push(0xC0);
        buf.push(0x0C);
        buf.extend_from_slice(&[0x00, 0x01]); // type A
        buf.extend_from_slice(&[0x00, 0x01]); // class IN
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x3C]); // ttl
        buf.extend_from_slice(&[0x00, 0x04]); // rdlength
        buf.extend_from_slice(&[93, 184, 216, 34]); // rdata (example.com A record)
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = DnsDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        let msg = d.result().unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].name, "www.example.com");
        assert_eq!(msg.answers[0].rdata, vec![93, 184, 216, 34]);
    }
}
