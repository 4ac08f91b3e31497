/*!
protosift dissects network protocols from raw byte buffers.

It is a pure parsing core: given a window of bytes plus optional transport
hints (ports, link type, SCTP payload protocol id), a [`dissector::Dissector`]
turns them into a typed [`context::Record`]. The crate does no I/O, no
capture, and no presentation — wiring a capture source and a result sink
around it is an adapter's job (see [`adapters`]).

Supported wire formats: ARP (RFC 826), DNS (RFC 1035, including message
compression), SSH-2 framing (RFC 4253), Telnet (RFC 854/855), WebSocket
(RFC 6455), MQTT 3.1/3.1.1/5.0, POP3 (RFC 1939), Diameter (RFC 6733),
GTPv2-C (3GPP TS 29.274), RADIUS (RFC 2865), M3UA (RFC 4666), plus structural
skeletons for S1AP/NGAP/X2AP and H.323/Q.931. A separate heuristic
[`classifier`] guesses a protocol when no registered dissector claims a
window.
*/

extern crate byteorder;
#[macro_use]
extern crate log;
#[macro_use]
extern crate failure;

pub mod adapters;
pub mod classifier;
pub mod context;
pub mod dissector;
pub mod dissectors;
pub mod error;
pub mod registry;
pub mod util;
pub mod window;

pub use adapters::{CaptureSource, DissectionOutcome, Hints, ResultSink};
pub use context::{ParseContext, Record, Stage};
pub use dissector::{Dissector, ProtocolDescriptor};
pub use error::{DResult, ParseOutcome, RegistryError};
pub use registry::{default_registry, ProtocolKey, Registry};
pub use window::ByteWindow;
