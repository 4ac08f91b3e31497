//! Supplemental: POP3 (RFC 1939). Line-oriented, CRLF-terminated, with a
//! multiline-response convention for LIST/RETR/TOP/UIDL/CAPA (terminated by a
//! lone "." line, with leading-dot byte-stuffing).

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3Command {
    User,
    Pass,
    Stat,
    List,
    Retr,
    Dele,
    Noop,
    Rset,
    Quit,
    Top,
    Uidl,
    Apop,
    Capa,
    Unknown,
}

impl Pop3Command {
    fn from_str(s: &str) -> Pop3Command {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Pop3Command::User,
            "PASS" => Pop3Command::Pass,
            "STAT" => Pop3Command::Stat,
            "LIST" => Pop3Command::List,
            "RETR" => Pop3Command::Retr,
            "DELE" => Pop3Command::Dele,
            "NOOP" => Pop3Command::Noop,
            "RSET" => Pop3Command::Rset,
            "QUIT" => Pop3Command::Quit,
            "TOP" => Pop3Command::Top,
            "UIDL" => Pop3Command::Uidl,
            "APOP" => Pop3Command::Apop,
            "CAPA" => Pop3Command::Capa,
            _ => Pop3Command::Unknown,
        }
    }

    fn expects_multiline_response(&self) -> bool {
        matches!(
            self,
            Pop3Command::List | Pop3Command::Retr | Pop3Command::Top | Pop3Command::Uidl | Pop3Command::Capa
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3CommandLine {
    pub command: Pop3Command,
    pub arguments: Vec<String>,
    pub raw_line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3Status {
    Ok,
    Err,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Response {
    pub status: Pop3Status,
    pub message: String,
    pub data_lines: Vec<String>,
    pub is_multiline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3State {
    Authorization,
    Transaction,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop3Event {
    Command(Pop3CommandLine),
    Response(Pop3Response),
}

fn parse_command_line(line: &str) -> Option<Pop3CommandLine> {
    let mut parts = line.split_whitespace();
    let command_str = parts.next()?;
    let command = Pop3Command::from_str(command_str);
    let arguments: Vec<String> = parts.map(|s| s.to_string()).collect();
    let valid = match command {
        Pop3Command::User | Pop3Command::Pass => arguments.len() == 1,
        Pop3Command::List | Pop3Command::Retr | Pop3Command::Dele | Pop3Command::Uidl => arguments.len() <= 1,
        Pop3Command::Top | Pop3Command::Apop => arguments.len() == 2,
        Pop3Command::Stat | Pop3Command::Noop | Pop3Command::Rset | Pop3Command::Quit | Pop3Command::Capa => {
            arguments.is_empty()
        }
        Pop3Command::Unknown => false,
    };
    if !valid {
        return None;
    }
    Some(Pop3CommandLine {
        command,
        arguments,
        raw_line: line.to_string(),
    })
}

fn parse_response_line(line: &str) -> Option<Pop3Response> {
    if let Some(rest) = line.strip_prefix("+OK") {
        Some(Pop3Response {
            status: Pop3Status::Ok,
            message: rest.trim().to_string(),
            data_lines: Vec::new(),
            is_multiline: false,
        })
    } else if let Some(rest) = line.strip_prefix("-ERR") {
        Some(Pop3Response {
            status: Pop3Status::Err,
            message: rest.trim().to_string(),
            data_lines: Vec::new(),
            is_multiline: false,
        })
    } else {
        None
    }
}

/// Undoes POP3 byte-stuffing: a line whose payload begins with "." is sent as
/// ".." so it isn't mistaken for the terminator.
fn unstuff(line: &str) -> String {
    if let Some(rest) = line.strip_prefix("..") {
        format!(".{}", rest)
    } else {
        line.to_string()
    }
}

#[derive(Default)]
pub struct Pop3Session {
    pub state_is_transaction: bool,
    pub username: Option<String>,
    pub authenticated: bool,
    pub message_count: i32,
    pub mailbox_size: u64,
}

impl Pop3Session {
    pub fn state(&self) -> Pop3State {
        if self.authenticated {
            Pop3State::Transaction
        } else {
            Pop3State::Authorization
        }
    }
}

static DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "POP3",
    protocol_id: 110,
    min_header_size: 0,
    min_message_size: 4,
    max_message_size: 65535,
};

/// Parses commands/responses line-by-line, leaving multiline bodies
/// (LIST/RETR/TOP/UIDL/CAPA) to accumulate in `pending_data_lines` until the
/// terminating lone "." arrives.
#[derive(Default)]
pub struct Pop3Dissector {
    session: Pop3Session,
    pending_multiline: Option<Pop3Command>,
    pending_status_line: Option<String>,
    pending_data_lines: Vec<String>,
    events_seen: usize,
}

impl Pop3Dissector {
    pub fn new() -> Pop3Dissector {
        Pop3Dissector::default()
    }

    pub fn session(&self) -> &Pop3Session {
        &self.session
    }

    fn apply_command(&mut self, cmd: &Pop3CommandLine) {
        if cmd.command.expects_multiline_response() {
            self.pending_multiline = Some(cmd.command);
        }
        match cmd.command {
            Pop3Command::Dele => {
                // message deletions are tracked by the caller's session store;
                // we surface the event and let it decide.
            }
            Pop3Command::Rset => {}
            _ => {}
        }
    }

    fn apply_response(&mut self, cmd_hint: Option<Pop3Command>, resp: &Pop3Response) {
        if resp.status != Pop3Status::Ok {
            return;
        }
        match cmd_hint {
            Some(Pop3Command::Pass) => {
                self.session.authenticated = true;
            }
            Some(Pop3Command::Stat) => {
                let mut parts = resp.message.split_whitespace();
                if let (Some(count), Some(size)) = (parts.next(), parts.next()) {
                    if let (Ok(c), Ok(s)) = (count.parse(), size.parse()) {
                        self.session.message_count = c;
                        self.session.mailbox_size = s;
                    }
                }
            }
            Some(Pop3Command::Quit) => {
                self.session.state_is_transaction = false;
            }
            _ => {}
        }
    }
}

impl Dissector for Pop3Dissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        let data = window.as_slice();
        if data.len() < 4 {
            return false;
        }
        data.starts_with(b"+OK") || data.starts_with(b"-ERR") || {
            let prefix = &data[..data.len().min(5)];
            let upper: Vec<u8> = prefix.iter().map(|b| b.to_ascii_uppercase()).collect();
            upper.starts_with(b"USER") || upper.starts_with(b"PASS") || upper.starts_with(b"STAT")
                || upper.starts_with(b"LIST") || upper.starts_with(b"RETR") || upper.starts_with(b"QUIT")
        }
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let data = context.window().as_slice();
        let newline_pos = match data.iter().position(|&b| b == b'\n') {
            Some(p) => p,
            None => return ParseOutcome::NeedMoreData,
        };
        let raw_line = &data[..newline_pos];
        let trimmed = std::str::from_utf8(raw_line)
            .map(|s| s.trim_end_matches('\r'))
            .unwrap_or("");

        if let Some(pending_cmd) = self.pending_multiline {
            if trimmed == "." {
                let mut resp = parse_response_line(self.pending_status_line.as_deref().unwrap_or("+OK"))
                    .unwrap_or(Pop3Response {
                        status: Pop3Status::Ok,
                        message: String::new(),
                        data_lines: Vec::new(),
                        is_multiline: true,
                    });
                resp.is_multiline = true;
                resp.data_lines = std::mem::take(&mut self.pending_data_lines);
                self.apply_response(Some(pending_cmd), &resp);
                self.pending_multiline = None;
                self.pending_status_line = None;
                context.advance(newline_pos + 1);
                self.events_seen += 1;
                context.publish("pop3_event", Record::Pop3(Pop3Event::Response(resp)));
                context.set_stage(Stage::Complete);
                return ParseOutcome::Success;
            }
            if self.pending_status_line.is_none() {
                self.pending_status_line = Some(trimmed.to_string());
            } else {
                self.pending_data_lines.push(unstuff(trimmed));
            }
            context.advance(newline_pos + 1);
            context.set_stage(Stage::Complete);
            return ParseOutcome::NeedMoreData;
        }

        if trimmed.starts_with("+OK") || trimmed.starts_with("-ERR") {
            match parse_response_line(trimmed) {
                Some(resp) => {
                    context.advance(newline_pos + 1);
                    self.events_seen += 1;
                    context.publish("pop3_event", Record::Pop3(Pop3Event::Response(resp.clone())));
                    context.set_stage(Stage::Complete);
                    ParseOutcome::Success
                }
                None => {
                    context.set_stage(Stage::Error);
                    ParseOutcome::InvalidFormat("malformed POP3 response line")
                }
            }
        } else {
            match parse_command_line(trimmed) {
                Some(cmd) => {
                    self.apply_command(&cmd);
                    context.advance(newline_pos + 1);
                    self.events_seen += 1;
                    context.publish("pop3_event", Record::Pop3(Pop3Event::Command(cmd)));
                    context.set_stage(Stage::Complete);
                    ParseOutcome::Success
                }
                None => {
                    context.set_stage(Stage::Error);
                    ParseOutcome::InvalidFormat("unrecognised POP3 command syntax")
                }
            }
        }
    }

    fn reset(&mut self) {
        *self = Pop3Dissector::default();
    }

    fn progress(&self) -> f64 {
        if self.events_seen > 0 {
            1.0
        } else {
            0.0
        }
    }
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register(crate::registry::ProtocolKey::Port(110), || {
        Box::new(Pop3Dissector::new())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_command() {
        let data = b"USER alice\r\n";
        let w = ByteWindow::new(data);
        let mut ctx = ParseContext::new(w);
        let mut d = Pop3Dissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("pop3_event").unwrap() {
            Record::Pop3(Pop3Event::Command(cmd)) => {
                assert_eq!(cmd.command, Pop3Command::User);
                assert_eq!(cmd.arguments, vec!["alice".to_string()]);
            }
            _ => panic!("expected command"),
        }
    }

    #[test]
    fn pass_success_marks_authenticated() {
        let mut d = Pop3Dissector::new();
        let cmd = ByteWindow::new(b"PASS hunter2\r\n");
        let mut ctx = ParseContext::new(cmd);
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);

        let resp = ByteWindow::new(b"+OK logged in\r\n");
        let mut ctx2 = ParseContext::new(resp);
        assert_eq!(d.parse(&mut ctx2), ParseOutcome::Success);
        assert!(d.session().authenticated);
    }

    #[test]
    fn stat_response_updates_session() {
        let mut d = Pop3Dissector::new();
        let cmd = ByteWindow::new(b"STAT\r\n");
        let mut ctx = ParseContext::new(cmd);
        d.parse(&mut ctx);
        let resp = ByteWindow::new(b"+OK 2 320\r\n");
        let mut ctx2 = ParseContext::new(resp);
        d.parse(&mut ctx2);
        assert_eq!(d.session().message_count, 2);
        assert_eq!(d.session().mailbox_size, 320);
    }

    #[test]
    fn multiline_list_response_with_byte_stuffing() {
        let mut d = Pop3Dissector::new();
        let cmd = ByteWindow::new(b"LIST\r\n");
        let mut ctx = ParseContext::new(cmd);
        d.parse(&mut ctx);

        let body = b"+OK 2 messages\r\n1 200\r\n..leading dot\r\n.\r\n";
        let w = ByteWindow::new(body);
        let mut total = 0;
        let mut last = None;
        loop {
            let remaining = w.tail(total).unwrap();
            let mut step_ctx = ParseContext::new(remaining);
            let outcome = d.parse(&mut step_ctx);
            total += step_ctx.cursor();
            if outcome == ParseOutcome::Success {
                last = step_ctx.get("pop3_event").cloned();
                break;
            }
            if step_ctx.cursor() == 0 {
                break;
            }
        }
        match last.unwrap() {
            Record::Pop3(Pop3Event::Response(resp)) => {
                assert!(resp.is_multiline);
                assert_eq!(resp.data_lines, vec!["1 200".to_string(), ".leading dot".to_string()]);
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn incomplete_line_needs_more_data() {
        let data = b"USER ali";
        let w = ByteWindow::new(data);
        let mut ctx = ParseContext::new(w);
        let mut d = Pop3Dissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::NeedMoreData);
    }

    #[test]
    fn unknown_command_is_invalid_format() {
        let data = b"BOGUS\r\n";
        let w = ByteWindow::new(data);
        let mut ctx = ParseContext::new(w);
        let mut d = Pop3Dissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }
}
