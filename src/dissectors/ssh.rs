//! C8: SSH-2 (RFC 4253) — version exchange plus binary packet framing.
//!
//! State-machine-driven: `VersionExchange` reads banners up to the first
//! newline; once both sides have been seen the connection advances to
//! `KeyExchange`, then `Authentication` (on `NEWKEYS`), then `Connection`
//! (on `USERAUTH_SUCCESS`); `DISCONNECT` is terminal.

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::util::read_name_list;
use crate::window::ByteWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshLifecycle {
    VersionExchange,
    KeyExchange,
    Authentication,
    Connection,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionBanner {
    pub raw: String,
    pub protoversion: String,
    pub softwareversion: String,
    pub comments: Option<String>,
}

impl VersionBanner {
    /// `SSH-protoversion-softwareversion[ comments]`
    fn parse(line: &str) -> Option<VersionBanner> {
        let rest = line.strip_prefix("SSH-")?;
        let (version_and_software, comments) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].to_string())),
            None => (rest, None),
        };
        let mut parts = version_and_software.splitn(2, '-');
        let protoversion = parts.next()?.to_string();
        let softwareversion = parts.next()?.to_string();
        Some(VersionBanner {
            raw: line.to_string(),
            protoversion,
            softwareversion,
            comments,
        })
    }

    /// Treats `1.99` as SSH-2-compatible per the RFC-4253 transitional string.
    pub fn is_ssh2_compatible(&self) -> bool {
        self.protoversion == "2.0" || self.protoversion == "1.99"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    pub cookie: [u8; 16],
    pub kex_algorithms: Vec<String>,
    pub server_host_key_algorithms: Vec<String>,
    pub encryption_client_to_server: Vec<String>,
    pub encryption_server_to_client: Vec<String>,
    pub mac_client_to_server: Vec<String>,
    pub mac_server_to_client: Vec<String>,
    pub compression_client_to_server: Vec<String>,
    pub compression_server_to_client: Vec<String>,
    pub languages_client_to_server: Vec<String>,
    pub languages_server_to_client: Vec<String>,
    pub first_kex_packet_follows: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshMessage {
    KexInit(KexInit),
    NewKeys,
    ServiceRequest(String),
    ServiceAccept(String),
    UserAuthSuccess,
    Disconnect { reason_code: u32, description: String },
    Unknown { message_type: u8, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshEvent {
    ClientBanner(VersionBanner),
    ServerBanner(VersionBanner),
    Message(SshMessage),
}

const MIN_PACKET_LENGTH: usize = 1;
const MAX_PACKET_LENGTH: usize = 35000;

fn parse_banner_line<'a>(window: &ByteWindow<'a>) -> Result<(VersionBanner, usize), ParseOutcome> {
    let data = window.as_slice();
    let nl = data.iter().position(|&b| b == b'\n').ok_or(ParseOutcome::NeedMoreData)?;
    let mut end = nl;
    if end > 0 && data[end - 1] == b'\r' {
        end -= 1;
    }
    let line = std::str::from_utf8(&data[..end])
        .map_err(|_| ParseOutcome::InvalidFormat("ssh banner is not valid UTF-8"))?;
    let banner = VersionBanner::parse(line).ok_or(ParseOutcome::InvalidFormat("malformed ssh version banner"))?;
    Ok((banner, nl + 1))
}

fn parse_binary_packet<'a>(window: &ByteWindow<'a>) -> Result<(SshMessage, usize), ParseOutcome> {
    let packet_length = window.read_u32(0)? as usize;
    if packet_length < MIN_PACKET_LENGTH || packet_length > MAX_PACKET_LENGTH {
        return Err(ParseOutcome::InvalidFormat("ssh packet length out of [1, 35000] window"));
    }
    let padding_length = window.read_u8(4)? as usize;
    if padding_length < 4 || padding_length >= packet_length {
        return Err(ParseOutcome::InvalidFormat("ssh padding length invariant violated"));
    }
    let total = 4 + packet_length;
    let full = window.sub(0, total)?;
    let payload_len = packet_length - 1 - padding_length;
    let payload = full.sub(5, payload_len)?;
    let message_type = payload.read_u8(0)?;
    let body = payload.tail(1)?;

    let message = match message_type {
        20 => SshMessage::KexInit(parse_kex_init(&body)?),
        21 => SshMessage::NewKeys,
        5 => SshMessage::ServiceRequest(read_ssh_string(&body, 0)?.0),
        6 => SshMessage::ServiceAccept(read_ssh_string(&body, 0)?.0),
        52 => SshMessage::UserAuthSuccess,
        1 => {
            let reason_code = body.read_u32(0)?;
            let (description, _) = read_ssh_string(&body, 4)?;
            SshMessage::Disconnect { reason_code, description }
        }
        other => SshMessage::Unknown {
            message_type: other,
            payload: body.as_slice().to_vec(),
        },
    };
    Ok((message, total))
}

fn read_ssh_string(w: &ByteWindow, offset: usize) -> Result<(String, usize), ParseOutcome> {
    let (bytes, consumed) = crate::util::read_length_prefixed_bytes(w, offset)?;
    let s = String::from_utf8_lossy(bytes).to_string();
    Ok((s, consumed))
}

fn parse_kex_init(body: &ByteWindow) -> Result<KexInit, ParseOutcome> {
    let cookie_sub = body.sub(0, 16)?;
    let mut cookie = [0u8; 16];
    cookie.copy_from_slice(cookie_sub.as_slice());
    let mut offset = 16;
    let mut lists = Vec::with_capacity(10);
    for _ in 0..10 {
        let (list, consumed) = read_name_list(body, offset)?;
        offset += consumed;
        lists.push(list);
    }
    let first_kex_packet_follows = body.read_u8(offset)? != 0;

    let mut it = lists.into_iter();
    Ok(KexInit {
        cookie,
        kex_algorithms: it.next().unwrap(),
        server_host_key_algorithms: it.next().unwrap(),
        encryption_client_to_server: it.next().unwrap(),
        encryption_server_to_client: it.next().unwrap(),
        mac_client_to_server: it.next().unwrap(),
        mac_server_to_client: it.next().unwrap(),
        compression_client_to_server: it.next().unwrap(),
        compression_server_to_client: it.next().unwrap(),
        languages_client_to_server: it.next().unwrap(),
        languages_server_to_client: it.next().unwrap(),
        first_kex_packet_follows,
    })
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "SSH",
    protocol_id: 22,
    min_header_size: 5,
    min_message_size: 5,
    max_message_size: 4 + MAX_PACKET_LENGTH,
};

pub struct SshDissector {
    pub lifecycle: SshLifecycle,
    client_banner: Option<VersionBanner>,
    server_banner: Option<VersionBanner>,
    messages: Vec<SshMessage>,
    /// Caller tells us, via probe-time convention, whether this window is the
    /// client or server side; a stream-oriented caller would instantiate one
    /// dissector per direction. Defaults to client.
    pub is_client_side: bool,
}

impl Default for SshDissector {
    fn default() -> SshDissector {
        SshDissector {
            lifecycle: SshLifecycle::VersionExchange,
            client_banner: None,
            server_banner: None,
            messages: Vec::new(),
            is_client_side: true,
        }
    }
}

impl SshDissector {
    pub fn new() -> SshDissector {
        SshDissector::default()
    }

    pub fn messages(&self) -> &[SshMessage] {
        &self.messages
    }
}

impl Dissector for SshDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        window.as_slice().starts_with(b"SSH-") || window.len() >= 5
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let window = *context.window();

        if self.lifecycle == SshLifecycle::VersionExchange && window.as_slice().starts_with(b"SSH-") {
            return match parse_banner_line(&window) {
                Ok((banner, consumed)) => {
                    context.advance(consumed);
                    let compatible = banner.is_ssh2_compatible();
                    let event = if self.is_client_side {
                        self.client_banner = Some(banner.clone());
                        SshEvent::ClientBanner(banner)
                    } else {
                        self.server_banner = Some(banner.clone());
                        SshEvent::ServerBanner(banner)
                    };
                    if self.client_banner.is_some() && self.server_banner.is_some() && compatible {
                        self.lifecycle = SshLifecycle::KeyExchange;
                    }
                    context.publish("ssh_event", Record::Ssh(event));
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

        match parse_binary_packet(&window) {
            Ok((message, consumed)) => {
                context.advance(consumed);
                match &message {
                    SshMessage::NewKeys => self.lifecycle = SshLifecycle::Authentication,
                    SshMessage::UserAuthSuccess => self.lifecycle = SshLifecycle::Connection,
                    SshMessage::Disconnect { .. } => self.lifecycle = SshLifecycle::Disconnected,
                    _ => {}
                }
                self.messages.push(message.clone());
                context.publish("ssh_event", Record::Ssh(SshEvent::Message(message)));
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
        *self = SshDissector::default();
    }

    fn progress(&self) -> f64 {
        match self.lifecycle {
            SshLifecycle::VersionExchange => 0.0,
            SshLifecycle::KeyExchange => 0.25,
            SshLifecycle::Authentication => 0.5,
            SshLifecycle::Connection => 1.0,
            SshLifecycle::Disconnected => 1.0,
        }
    }
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register(crate::registry::ProtocolKey::Port(22), || {
        Box::new(SshDissector::new())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_banner() {
        let data = b"SSH-2.0-OpenSSH_9.3\r\n";
        let w = ByteWindow::new(data);
        let mut ctx = ParseContext::new(w);
        let mut d = SshDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        assert_eq!(d.client_banner.as_ref().unwrap().softwareversion, "OpenSSH_9.3");
        assert_eq!(d.lifecycle, SshLifecycle::VersionExchange);
    }

    #[test]
    fn both_banners_advance_to_key_exchange() {
        let mut d = SshDissector::new();
        let client = ByteWindow::new(b"SSH-2.0-OpenSSH_9.3\r\n");
        let mut ctx = ParseContext::new(client);
        d.parse(&mut ctx);

        d.is_client_side = false;
        let server = ByteWindow::new(b"SSH-2.0-libssh_0.10\r\n");
        let mut ctx2 = ParseContext::new(server);
        d.parse(&mut ctx2);
        assert_eq!(d.lifecycle, SshLifecycle::KeyExchange);
    }

    #[test]
    fn ssh_1_99_treated_as_ssh2_compatible() {
        let banner = VersionBanner::parse("SSH-1.99-OpenSSH_2.3").unwrap();
        assert!(banner.is_ssh2_compatible());
    }

    #[test]
    fn kexinit_packet() {
        let mut d = SshDissector::new();
        d.lifecycle = SshLifecycle::KeyExchange;

        let mut payload = vec![20u8]; // SSH_MSG_KEXINIT
        payload.extend_from_slice(&[0u8; 16]); // cookie
        for _ in 0..10 {
            let list = b"diffie-hellman-group14-sha256";
            payload.extend_from_slice(&(list.len() as u32).to_be_bytes());
            payload.extend_from_slice(list);
        }
        payload.push(0); // first_kex_packet_follows = false
        payload.extend_from_slice(&[0, 0, 0, 0]); // reserved

        let padding_length: usize = 4;
        let packet_length = 1 + payload.len() + padding_length;
        let mut buf = Vec::new();
        buf.extend_from_slice(&(packet_length as u32).to_be_bytes());
        buf.push(padding_length as u8);
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&vec![0u8; padding_length]);

        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        assert!(matches!(d.messages()[0], SshMessage::KexInit(_)));
    }

    #[test]
    fn newkeys_advances_lifecycle() {
        let mut d = SshDissector::new();
        d.lifecycle = SshLifecycle::KeyExchange;
        let padding_length: usize = 4;
        let packet_length = 1 + padding_length;
        let mut buf = Vec::new();
        buf.extend_from_slice(&(packet_length as u32).to_be_bytes());
        buf.push(padding_length as u8);
        buf.push(21); // NEWKEYS
        buf.extend_from_slice(&vec![0u8; padding_length]);
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        assert_eq!(d.lifecycle, SshLifecycle::Authentication);
    }

    #[test]
    fn bad_padding_length_is_invalid_format() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.push(2); // < 4, invalid
        buf.extend_from_slice(&[0u8; 9]);
        let w = ByteWindow::new(&buf);
        let mut ctx = ParseContext::new(w);
        let mut d = SshDissector::new();
        d.lifecycle = SshLifecycle::KeyExchange;
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }
}
