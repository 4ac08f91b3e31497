//! C4: the abstract contract every concrete dissector implements.
//!
//! The source this crate is modelled on has each parser inherit from a
//! `BaseParser` base class. We re-architect that as a single capability
//! interface implemented by value types — no virtual base data, no hierarchy.

use crate::context::ParseContext;
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

/// Static metadata describing a protocol a [`Dissector`] understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub name: &'static str,
    /// Port number (transport-layer), ethertype, or SCTP PPID, depending on layer.
    pub protocol_id: u32,
    pub min_header_size: usize,
    pub min_message_size: usize,
    pub max_message_size: usize,
}

/// The capability interface every protocol decoder implements.
///
/// `parse` must be re-entrant across separate instances but need not be
/// thread-safe on one instance — see spec §5.
pub trait Dissector {
    /// Static protocol metadata.
    fn descriptor(&self) -> &'static ProtocolDescriptor;

    /// Cheap look-before-parse test: does this window look like my protocol?
    /// `probe(w) == false` must imply `parse` on that same window never
    /// returns `Success`.
    fn probe(&self, window: &ByteWindow) -> bool;

    /// Full dissection, may be called iteratively (see [`ParseContext`]'s
    /// staged state machine). `NeedMoreData` leaves the context resumable.
    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome;

    /// Clears internal state between packets so the instance can be reused.
    fn reset(&mut self);

    /// Monotone progress in `[0.0, 1.0]`, for UI consumers.
    fn progress(&self) -> f64;
}
