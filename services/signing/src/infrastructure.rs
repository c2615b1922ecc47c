// Infrastructure layer modules

pub mod cert_loader;
pub mod config;
pub mod document_store;
pub mod envelope_repository;
pub mod event_bus;
pub mod kms_signer;
pub mod logging;
pub mod ops_alert;
pub mod outbox_repository;

// Re-exports
pub use cert_loader::{CertLoaderError, CertificateSource, SsmCertLoader};
pub use config::{SigningConfig, SigningConfigError};
pub use document_store::{DocumentStore, DocumentStoreError, S3DocumentStore};
pub use envelope_repository::{
    CreateResult, DynamoEnvelopeRepository, EnvelopeRepository, EnvelopeRepositoryError,
    UpdateResult,
};
pub use event_bus::{EventBridgeBus, EventBus, EventBusError, OutboundEvent, PublishOutcome};
pub use kms_signer::{KmsSigner, RemoteSigner, SignerError};
pub use logging::init_logging;
pub use ops_alert::{AlertResult, OpsAlert, OpsAlertError, SnsOpsAlert};
pub use outbox_repository::{
    DynamoOutboxRepository, MarkResult, OutboxRepository, OutboxRepositoryError,
};
