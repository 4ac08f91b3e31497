//! The adapter contract (spec.md §6). Capture and presentation adapters are
//! explicitly out-of-core: a capture adapter hands the engine `(window,
//! hints)` tuples, a presentation adapter consumes the resulting metadata map.
//! Neither sees internal dissector types — only [`Hints`], the `Record` enum,
//! and [`crate::error::ParseOutcome`].
//!
//! No concrete adapter lives here (no pcap reading, no stdout printer); this
//! module is the seam, not an implementation. A caller wiring this crate into
//! a capture pipeline implements [`CaptureSource`] and [`ResultSink`] for
//! whatever transport and output format it needs.

use std::collections::HashMap;

use crate::context::Record;
use crate::dissector::Dissector;
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

/// Per-packet side information a capture adapter may know and a dissector may
/// use to pick or disambiguate a registry entry (spec.md §6, "Inputs").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hints {
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub link_type: Option<u16>,
    pub sctp_payload_protocol_id: Option<u32>,
}

impl Hints {
    pub fn with_ports(src_port: u16, dst_port: u16) -> Hints {
        Hints {
            src_port: Some(src_port),
            dst_port: Some(dst_port),
            ..Hints::default()
        }
    }
}

/// What a completed dissection produced, for a presentation adapter to
/// consume without reaching into dissector internals.
#[derive(Debug, Clone, PartialEq)]
pub struct DissectionOutcome {
    pub result: ParseOutcome,
    pub records: HashMap<&'static str, Record>,
}

/// A source of `(window, hints)` pairs. An in-process implementation might
/// wrap a pcap reader; a streaming one might wrap a socket. This crate
/// defines only the contract, per spec.md §9's note that a bounded queue
/// between capture and dissection is an adapter concern, not a core one.
pub trait CaptureSource {
    /// Yields the next packet's bytes and hints, or `None` once exhausted.
    /// The returned slice borrows from the source and must outlive the call
    /// that consumes it; sources that can't guarantee this should copy into
    /// an owned buffer before returning.
    fn next_packet(&mut self) -> Option<(Vec<u8>, Hints)>;
}

/// A consumer of completed dissections. Implementations decide what to do
/// with a non-`Success` outcome — log, drop, or quarantine the packet
/// (spec.md §7, "User-visible failure").
pub trait ResultSink {
    fn accept(&mut self, outcome: DissectionOutcome);
}

/// Drives a [`CaptureSource`] through a dissector built from the default
/// registry, forwarding every outcome to a [`ResultSink`]. This is the
/// reference wiring described by the adapter contract; callers with more
/// specific needs (custom registry, per-worker sharding) compose
/// [`crate::registry::Registry`] and [`crate::context::ParseContext`] directly.
pub fn run_pipeline<S, K>(source: &mut S, key: K, sink: &mut dyn ResultSink)
where
    S: CaptureSource,
    K: Fn(&Hints) -> crate::registry::ProtocolKey,
{
    while let Some((bytes, hints)) = source.next_packet() {
        let registry = crate::registry::default_registry();
        let protocol_key = key(&hints);
        let mut dissector = match registry.create(protocol_key) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let window = ByteWindow::new(&bytes);
        let mut context = crate::context::ParseContext::new(window);
        let result = dissector.parse(&mut context);
        sink.accept(DissectionOutcome {
            result,
            records: context.drain(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProtocolKey;

    struct VecSource {
        packets: Vec<(Vec<u8>, Hints)>,
    }

    impl CaptureSource for VecSource {
        fn next_packet(&mut self) -> Option<(Vec<u8>, Hints)> {
            self.packets.pop()
        }
    }

    struct CountingSink {
        outcomes: Vec<DissectionOutcome>,
    }

    impl ResultSink for CountingSink {
        fn accept(&mut self, outcome: DissectionOutcome) {
            self.outcomes.push(outcome);
        }
    }

    #[test]
    fn pipeline_dispatches_arp_by_ethertype() {
        let arp_request: Vec<u8> = vec![
            0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
            0xc0, 0xa8, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0xa8, 0x01, 0x02,
        ];
        let mut source = VecSource {
            packets: vec![(arp_request, Hints::default())],
        };
        let mut sink = CountingSink { outcomes: Vec::new() };

        run_pipeline(&mut source, |_hints| ProtocolKey::EtherType(0x0806), &mut sink);

        assert_eq!(sink.outcomes.len(), 1);
        assert_eq!(sink.outcomes[0].result, ParseOutcome::Success);
        assert!(sink.outcomes[0].records.contains_key("arp_record"));
    }

    #[test]
    fn unknown_registry_key_is_skipped_not_fatal() {
        let mut source = VecSource {
            packets: vec![(vec![1, 2, 3], Hints::default())],
        };
        let mut sink = CountingSink { outcomes: Vec::new() };

        run_pipeline(&mut source, |_hints| ProtocolKey::Port(0), &mut sink);

        assert!(sink.outcomes.is_empty());
    }
}
