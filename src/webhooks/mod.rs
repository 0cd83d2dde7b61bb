/// Inbound webhook payloads from external integrations
pub mod payment_events;

pub use payment_events::{
    verify_signature, PaymentEvent, PaymentEventKind, SignatureError, SIGNATURE_HEADER,
};
