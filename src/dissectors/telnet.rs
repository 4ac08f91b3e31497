//! C8: Telnet (RFC 854 / 855) — stream-oriented, one byte at a time.

use std::collections::HashMap;

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

pub const IAC: u8 = 0xFF;
pub const WILL: u8 = 0xFB;
pub const WONT: u8 = 0xFC;
pub const DO: u8 = 0xFD;
pub const DONT: u8 = 0xFE;
pub const SB: u8 = 0xFA;
pub const SE: u8 = 0xF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationCommand {
    Will,
    Wont,
    Do,
    Dont,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetMessage {
    Data(Vec<u8>),
    Command(u8),
    Negotiation(NegotiationCommand, u8),
    Subnegotiation(u8, Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptionState {
    pub local_enabled: bool,
    pub remote_enabled: bool,
}

/// Parses as many complete messages as the window holds, starting at offset 0.
/// Returns the messages and the number of bytes consumed. A trailing partial
/// IAC sequence is left unconsumed (caller resumes once more bytes arrive).
fn parse_stream(data: &[u8]) -> (Vec<TelnetMessage>, usize) {
    let mut messages = Vec::new();
    let mut i = 0;
    let mut data_run_start: Option<usize> = None;

    macro_rules! flush_data {
        ($end:expr) => {
            if let Some(start) = data_run_start.take() {
                if $end > start {
                    messages.push(TelnetMessage::Data(data[start..$end].to_vec()));
                }
            }
        };
    }

    while i < data.len() {
        if data[i] != IAC {
            if data_run_start.is_none() {
                data_run_start = Some(i);
            }
            i += 1;
            continue;
        }

        // We've hit an IAC; flush any pending plain-data run first.
        flush_data!(i);

        if i + 1 >= data.len() {
            break; // incomplete IAC sequence; resume later
        }
        match data[i + 1] {
            IAC => {
                // Escaped 0xFF data byte.
                messages.push(TelnetMessage::Data(vec![0xFF]));
                i += 2;
            }
            WILL | WONT | DO | DONT => {
                if i + 2 >= data.len() {
                    break;
                }
                let cmd = match data[i + 1] {
                    WILL => NegotiationCommand::Will,
                    WONT => NegotiationCommand::Wont,
                    DO => NegotiationCommand::Do,
                    DONT => NegotiationCommand::Dont,
                    _ => unreachable!(),
                };
                messages.push(TelnetMessage::Negotiation(cmd, data[i + 2]));
                i += 3;
            }
            SB => {
                // Find IAC SE, treating IAC IAC inside as an escaped byte.
                let mut j = i + 2;
                let mut payload = Vec::new();
                let mut terminated = false;
                while j < data.len() {
                    if data[j] == IAC {
                        if j + 1 >= data.len() {
                            break;
                        }
                        if data[j + 1] == SE {
                            terminated = true;
                            j += 2;
                            break;
                        } else if data[j + 1] == IAC {
                            payload.push(0xFF);
                            j += 2;
                            continue;
                        }
                    }
                    payload.push(data[j]);
                    j += 1;
                }
                if !terminated {
                    break; // incomplete subnegotiation; resume later
                }
                let option = data[i + 2];
                messages.push(TelnetMessage::Subnegotiation(option, payload));
                i = j;
            }
            other => {
                messages.push(TelnetMessage::Command(other));
                i += 2;
            }
        }
        data_run_start = None;
    }

    flush_data!(i);
    (messages, i)
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "Telnet",
    protocol_id: 23,
    min_header_size: 1,
    min_message_size: 1,
    max_message_size: 65536,
};

#[derive(Default)]
pub struct TelnetDissector {
    /// Negotiated option state, keyed by option byte.
    pub options: HashMap<u8, OptionState>,
    messages_seen: usize,
}

impl TelnetDissector {
    pub fn new() -> TelnetDissector {
        TelnetDissector::default()
    }

    /// Options defined by RFC 854/855 and the common telnetd extensions;
    /// anything else is still tracked, just logged as unrecognised.
    const KNOWN_OPTIONS: [u8; 7] = [0, 1, 3, 24, 31, 32, 34];

    fn apply_negotiation(&mut self, cmd: NegotiationCommand, option: u8) {
        if !Self::KNOWN_OPTIONS.contains(&option) {
            warn!("unrecognised telnet option {} in {:?} negotiation", option, cmd);
        }
        let state = self.options.entry(option).or_default();
        match cmd {
            NegotiationCommand::Will => state.remote_enabled = true,
            NegotiationCommand::Wont => state.remote_enabled = false,
            NegotiationCommand::Do => state.local_enabled = true,
            NegotiationCommand::Dont => state.local_enabled = false,
        }
    }
}

impl Dissector for TelnetDissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        !window.is_empty()
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let data = context.window().as_slice();
        if data.is_empty() {
            return ParseOutcome::NeedMoreData;
        }
        let (messages, consumed) = parse_stream(data);
        if consumed == 0 {
            return ParseOutcome::NeedMoreData;
        }
        context.advance(consumed);
        for message in &messages {
            if let TelnetMessage::Negotiation(cmd, option) = message {
                self.apply_negotiation(*cmd, *option);
            }
        }
        self.messages_seen += messages.len();
        // Publish the last message of this call; callers that want all of them
        // can iterate a stream of contexts (spec.md: each call is one logical
        // message delivered by the caller).
        if let Some(last) = messages.into_iter().last() {
            context.publish("telnet_message", Record::Telnet(last));
        }
        context.set_stage(Stage::Complete);
        ParseOutcome::Success
    }

    fn reset(&mut self) {
        self.options.clear();
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
    registry.register(crate::registry::ProtocolKey::Port(23), || {
        Box::new(TelnetDissector::new())
    });
}
