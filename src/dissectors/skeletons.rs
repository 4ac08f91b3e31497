//! Structural-only skeletons for S1AP, NGAP, X2AP, and H.323 — these protocols
//! are ASN.1 PER (or, for H.323's Q.931 layer, ITU-T Q.931) encoded in full;
//! a conforming decoder for either is out of scope here. What we extract is
//! the PDU choice and procedure/message code, leaving the remainder as an
//! opaque payload for a caller that links a real ASN.1 compiler.

use crate::context::{ParseContext, Record, Stage};
use crate::dissector::{Dissector, ProtocolDescriptor};
use crate::error::ParseOutcome;
use crate::window::ByteWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduChoice {
    InitiatingMessage,
    SuccessfulOutcome,
    UnsuccessfulOutcome,
}

impl PduChoice {
    fn from_u8(v: u8) -> Result<PduChoice, ParseOutcome> {
        match v {
            1 => Ok(PduChoice::InitiatingMessage),
            2 => Ok(PduChoice::SuccessfulOutcome),
            3 => Ok(PduChoice::UnsuccessfulOutcome),
            _ => Err(ParseOutcome::InvalidFormat("unrecognised PDU choice tag")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApKind {
    S1ap,
    Ngap,
    X2ap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApSkeleton {
    pub kind: ApKind,
    pub pdu_choice: PduChoice,
    pub procedure_code: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H323Skeleton {
    pub protocol_discriminator: u8,
    pub call_reference: Vec<u8>,
    pub message_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkeletonMessage {
    Ap(ApSkeleton),
    H323(H323Skeleton),
}

fn parse_ap_skeleton(kind: ApKind, window: &ByteWindow) -> Result<ApSkeleton, ParseOutcome> {
    if window.len() < 2 {
        return Err(ParseOutcome::BufferTooSmall);
    }
    let pdu_choice = PduChoice::from_u8(window.read_u8(0)?)?;
    let procedure_code = window.read_u8(1)?;
    let payload = window.tail(2)?.as_slice().to_vec();
    Ok(ApSkeleton {
        kind,
        pdu_choice,
        procedure_code,
        payload,
    })
}

/// Q.931 call-establishment header: protocol discriminator (1 byte), a
/// length-prefixed call reference, then the message type.
fn parse_h323_skeleton(window: &ByteWindow) -> Result<(H323Skeleton, usize), ParseOutcome> {
    let protocol_discriminator = window.read_u8(0)?;
    if protocol_discriminator != 0x08 {
        return Err(ParseOutcome::InvalidFormat("not a Q.931 protocol discriminator"));
    }
    let call_reference_length = window.read_u8(1)? as usize;
    let call_reference = window.sub(2, call_reference_length)?.as_slice().to_vec();
    let message_type_offset = 2 + call_reference_length;
    let message_type = window.read_u8(message_type_offset)?;
    Ok((
        H323Skeleton {
            protocol_discriminator,
            call_reference,
            message_type,
        },
        message_type_offset + 1,
    ))
}

static S1AP_DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "S1AP",
    protocol_id: 36412,
    min_header_size: 2,
    min_message_size: 2,
    max_message_size: 65535,
};

static NGAP_DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "NGAP",
    protocol_id: 38412,
    min_header_size: 2,
    min_message_size: 2,
    max_message_size: 65535,
};

static X2AP_DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "X2AP",
    protocol_id: 36422,
    min_header_size: 2,
    min_message_size: 2,
    max_message_size: 65535,
};

static H323_DESCRIPTOR: ProtocolDescriptor = ProtocolDescriptor {
    name: "H.323",
    protocol_id: 1720,
    min_header_size: 3,
    min_message_size: 3,
    max_message_size: 65535,
};

macro_rules! ap_dissector {
    ($dissector:ident, $kind:expr, $descriptor:expr, $record_key:expr) => {
        #[derive(Default)]
        pub struct $dissector {
            messages_seen: usize,
        }

        impl $dissector {
            pub fn new() -> $dissector {
                $dissector::default()
            }
        }

        impl Dissector for $dissector {
            fn descriptor(&self) -> &'static ProtocolDescriptor {
                &$descriptor
            }

            fn probe(&self, window: &ByteWindow) -> bool {
                window.len() >= 2
            }

            fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
                context.set_stage(Stage::Parsing);
                let window = *context.window();
                match parse_ap_skeleton($kind, &window) {
                    Ok(skeleton) => {
                        context.advance(window.len());
                        self.messages_seen += 1;
                        context.publish($record_key, Record::Skeleton(SkeletonMessage::Ap(skeleton)));
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
    };
}

ap_dissector!(S1apDissector, ApKind::S1ap, S1AP_DESCRIPTOR, "s1ap_message");
ap_dissector!(NgapDissector, ApKind::Ngap, NGAP_DESCRIPTOR, "ngap_message");
ap_dissector!(X2apDissector, ApKind::X2ap, X2AP_DESCRIPTOR, "x2ap_message");

#[derive(Default)]
pub struct H323Dissector {
    messages_seen: usize,
}

impl H323Dissector {
    pub fn new() -> H323Dissector {
        H323Dissector::default()
    }
}

impl Dissector for H323Dissector {
    fn descriptor(&self) -> &'static ProtocolDescriptor {
        &H323_DESCRIPTOR
    }

    fn probe(&self, window: &ByteWindow) -> bool {
        window.len() >= 3 && window.read_u8(0).map(|v| v == 0x08).unwrap_or(false)
    }

    fn parse(&mut self, context: &mut ParseContext) -> ParseOutcome {
        context.set_stage(Stage::Parsing);
        let window = *context.window();
        match parse_h323_skeleton(&window) {
            Ok((skeleton, consumed)) => {
                context.advance(consumed);
                self.messages_seen += 1;
                context.publish("h323_message", Record::Skeleton(SkeletonMessage::H323(skeleton)));
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
    registry.register(crate::registry::ProtocolKey::Port(36412), || Box::new(S1apDissector::new()));
    registry.register(crate::registry::ProtocolKey::Port(38412), || Box::new(NgapDissector::new()));
    registry.register(crate::registry::ProtocolKey::Port(36422), || Box::new(X2apDissector::new()));
    registry.register(crate::registry::ProtocolKey::Port(1720), || Box::new(H323Dissector::new()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissector::Dissector;

    #[test]
    fn s1ap_initial_ue_message_skeleton() {
        let data = [1, 11, 0xAA, 0xBB]; // InitiatingMessage, InitialUEMessage procedure code
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = S1apDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("s1ap_message").unwrap() {
            Record::Skeleton(SkeletonMessage::Ap(s)) => {
                assert_eq!(s.kind, ApKind::S1ap);
                assert_eq!(s.pdu_choice, PduChoice::InitiatingMessage);
                assert_eq!(s.procedure_code, 11);
                assert_eq!(s.payload, vec![0xAA, 0xBB]);
            }
            _ => panic!("expected s1ap skeleton"),
        }
    }

    #[test]
    fn ngap_successful_outcome_skeleton() {
        let data = [2, 22];
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = NgapDissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("ngap_message").unwrap() {
            Record::Skeleton(SkeletonMessage::Ap(s)) => {
                assert_eq!(s.pdu_choice, PduChoice::SuccessfulOutcome);
                assert_eq!(s.procedure_code, 22);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn unrecognised_pdu_choice_is_invalid() {
        let data = [9, 0];
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = X2apDissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }

    #[test]
    fn h323_setup_message_skeleton() {
        let data = [0x08, 0x01, 0x7B, 0x05]; // discriminator, call-ref len 1, call-ref, Setup
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = H323Dissector::new();
        assert_eq!(d.parse(&mut ctx), ParseOutcome::Success);
        match ctx.get("h323_message").unwrap() {
            Record::Skeleton(SkeletonMessage::H323(s)) => {
                assert_eq!(s.call_reference, vec![0x7B]);
                assert_eq!(s.message_type, 0x05);
            }
            _ => panic!("expected h323 skeleton"),
        }
    }

    #[test]
    fn non_q931_discriminator_rejected() {
        let data = [0x01, 0x01, 0x00, 0x00];
        let w = ByteWindow::new(&data);
        let mut ctx = ParseContext::new(w);
        let mut d = H323Dissector::new();
        assert!(matches!(d.parse(&mut ctx), ParseOutcome::InvalidFormat(_)));
    }
}
