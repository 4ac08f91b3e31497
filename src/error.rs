//! The shared result taxonomy every dissector in this crate returns, plus the
//! handful of non-dissection errors (registry lookups) that don't fit it.

use std::fmt;

use failure::Fail;

/// The only outcomes any [`Dissector`](crate::dissector::Dissector) may produce.
///
/// This is a result *discriminant*, not an exception type: dissectors return it by
/// value from `parse`, and internal fallible reads use it as the `E` of
/// `Result<T, ParseOutcome>` (aliased as [`DResult`]) so `?` composes the same way
/// the teacher's `FromBytes::parse() -> Result<T, Error>` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The message was fully and validly parsed.
    Success,
    /// The buffer ends before a mandatory field could be read. Not fatal: the
    /// caller may append more bytes and resume.
    NeedMoreData,
    /// A mandatory field violates a syntactic rule. Terminal for this context.
    InvalidFormat(&'static str),
    /// The message declares a protocol version this dissector doesn't handle.
    UnsupportedVersion,
    /// The buffer is smaller than the protocol's minimum header size.
    BufferTooSmall,
    /// An unreachable state was reached. An engineering bug, not input-driven.
    InternalError(&'static str),
}

impl fmt::Display for ParseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseOutcome::Success => write!(f, "success"),
            ParseOutcome::NeedMoreData => write!(f, "need more data"),
            ParseOutcome::InvalidFormat(why) => write!(f, "invalid format: {}", why),
            ParseOutcome::UnsupportedVersion => write!(f, "unsupported version"),
            ParseOutcome::BufferTooSmall => write!(f, "buffer too small"),
            ParseOutcome::InternalError(why) => write!(f, "internal error: {}", why),
        }
    }
}

impl ParseOutcome {
    /// `true` for the only non-terminal failure variant.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ParseOutcome::NeedMoreData)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Success)
    }
}

/// Every internal fallible read in this crate returns `DResult<T>`, reusing
/// [`ParseOutcome`]'s failure variants as the error type.
pub type DResult<T> = Result<T, ParseOutcome>;

/// Errors outside the dissection taxonomy: looking up or registering dissectors.
#[derive(Debug, Fail)]
pub enum RegistryError {
    #[fail(display = "no dissector registered for key {:?}", _0)]
    UnknownKey(crate::registry::ProtocolKey),
    #[fail(display = "a dissector is already registered for key {:?}", _0)]
    DuplicateKey(crate::registry::ProtocolKey),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
