pub mod webhook_signature;

pub use webhook_signature::{WebhookSignatureValidator, SIGNATURE_HEADER};
