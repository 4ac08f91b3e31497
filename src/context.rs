//! C5: the parse context and its staged state machine.

use std::collections::HashMap;

use crate::dissectors::{
    arp::ArpRecord, diameter::DiameterMessage, dns::DnsMessage, gtpv2::Gtpv2Message,
    m3ua::M3uaMessage, mqtt::MqttPacket, pop3::Pop3Event, radius::RadiusPacket,
    skeletons::SkeletonMessage, ssh::SshEvent, telnet::TelnetMessage, websocket::WebSocketRecord,
};
use crate::window::ByteWindow;

/// Lifecycle of a [`ParseContext`]. Stage transitions are explicit: each stage
/// handler returns a [`crate::error::ParseOutcome`]; `NeedMoreData` leaves the
/// context in its current stage so the caller can resume after appending bytes.
/// `InvalidFormat` moves to `Error`, which is terminal for that context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initial,
    Parsing,
    Complete,
    Error,
}

/// A discriminated union of every protocol's published record type.
///
/// Design Note: the context metadata map could hold either (a) one concrete,
/// statically-typed struct per dissector, or (b) a single enum spanning every
/// record type. We take (b) here because the registry dispatches dissectors
/// dynamically (spec.md §4.5) and the adapter draining the map doesn't know
/// ahead of time which protocol matched.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Arp(ArpRecord),
    Dns(DnsMessage),
    Ssh(SshEvent),
    Telnet(TelnetMessage),
    WebSocket(WebSocketRecord),
    Mqtt(MqttPacket),
    Pop3(Pop3Event),
    Diameter(DiameterMessage),
    Gtpv2(Gtpv2Message),
    Radius(RadiusPacket),
    M3ua(M3uaMessage),
    Skeleton(SkeletonMessage),
}

/// Carries the buffer being parsed, the cursor, the lifecycle stage, and the
/// typed dissection output deposited under well-known string keys.
///
/// Created by the adapter, moved through the dissector, consumed by the adapter;
/// its lifetime ends when the adapter drains the metadata.
pub struct ParseContext<'a> {
    window: ByteWindow<'a>,
    cursor: usize,
    stage: Stage,
    metadata: HashMap<&'static str, Record>,
}

impl<'a> ParseContext<'a> {
    pub fn new(window: ByteWindow<'a>) -> ParseContext<'a> {
        ParseContext {
            window,
            cursor: 0,
            stage: Stage::Initial,
            metadata: HashMap::new(),
        }
    }

    pub fn window(&self) -> &ByteWindow<'a> {
        &self.window
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn advance(&mut self, by: usize) {
        self.cursor += by;
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Deposits a typed record into the metadata map under `key`. Called once
    /// per dissector, after the record is fully populated — published records
    /// are immutable thereafter.
    pub fn publish(&mut self, key: &'static str, record: Record) {
        self.metadata.insert(key, record);
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.metadata.get(key)
    }

    /// Drains the metadata map; intended to be called by the adapter once
    /// dissection is complete.
    pub fn drain(self) -> HashMap<&'static str, Record> {
        self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_starts_initial_and_is_settable() {
        let w = ByteWindow::new(&[]);
        let mut ctx = ParseContext::new(w);
        assert_eq!(ctx.stage(), Stage::Initial);
        ctx.set_stage(Stage::Parsing);
        assert_eq!(ctx.stage(), Stage::Parsing);
    }

    #[test]
    fn publish_then_drain_round_trips() {
        let w = ByteWindow::new(&[]);
        let mut ctx = ParseContext::new(w);
        ctx.publish("telnet_event", Record::Telnet(TelnetMessage::Data(vec![1, 2, 3])));
        assert!(matches!(ctx.get("telnet_event"), Some(Record::Telnet(_))));
        let map = ctx.drain();
        assert_eq!(map.len(), 1);
    }
}
