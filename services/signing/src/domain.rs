// Domain layer modules
pub mod access_token;
pub mod der;
pub mod domain_event;
pub mod envelope;
pub mod envelope_status;
pub mod pdf;
pub mod pkcs7;
pub mod signing_validator;

// Re-exports
pub use access_token::AccessToken;
pub use domain_event::{DomainEvent, EVENT_SOURCE, OutboxRecord, OutboxStatus};
pub use envelope::{Envelope, EnvelopeError, NewEnvelope, SignatureOutcome, Signer};
pub use envelope_status::{EnvelopeStatus, SignerStatus, SigningOrder};
pub use signing_validator::{SigningValidator, ValidationError};
