/// Domain events published through the transactional outbox
///
/// Requirements: 4.1, 4.2, 5.1
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::envelope::{Envelope, Signer};

/// EventBridge source attribute for everything this service emits (Req 5.1)
pub const EVENT_SOURCE: &str = "esign.signing";

/// Events emitted by the signing workflow
///
/// The serialized form carries the detail-type under `event_type`, so a
/// consumer can match on it without the EventBridge envelope. Timestamps
/// are epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    #[serde(rename = "envelope.sent")]
    EnvelopeSent {
        tenant_id: String,
        envelope_id: String,
        title: String,
        sender_email: String,
        signer_count: usize,
        expires_at: i64,
    },
    /// A signer's turn has started and a fresh access token was issued.
    /// The token rides along so the notification service can build the
    /// signing link; the event bus is internal and IAM-scoped.
    #[serde(rename = "signer.turn_started")]
    SignerTurnStarted {
        tenant_id: String,
        envelope_id: String,
        signer_id: String,
        signer_email: String,
        signer_name: String,
        title: String,
        access_token: String,
        expires_at: i64,
    },
    #[serde(rename = "signer.signed")]
    SignerSigned {
        tenant_id: String,
        envelope_id: String,
        signer_id: String,
        signer_email: String,
        signed_at: i64,
    },
    #[serde(rename = "envelope.completed")]
    EnvelopeCompleted {
        tenant_id: String,
        envelope_id: String,
        title: String,
        sender_email: String,
        completed_document_key: String,
        signer_emails: Vec<String>,
    },
    #[serde(rename = "envelope.declined")]
    EnvelopeDeclined {
        tenant_id: String,
        envelope_id: String,
        title: String,
        sender_email: String,
        signer_id: String,
        signer_email: String,
        reason: String,
    },
    #[serde(rename = "envelope.voided")]
    EnvelopeVoided {
        tenant_id: String,
        envelope_id: String,
        title: String,
        sender_email: String,
    },
    #[serde(rename = "envelope.expired")]
    EnvelopeExpired {
        tenant_id: String,
        envelope_id: String,
        title: String,
        sender_email: String,
    },
}

impl DomainEvent {
    /// EventBridge detail-type, identical to the serialized `event_type`
    pub fn detail_type(&self) -> &'static str {
        match self {
            DomainEvent::EnvelopeSent { .. } => "envelope.sent",
            DomainEvent::SignerTurnStarted { .. } => "signer.turn_started",
            DomainEvent::SignerSigned { .. } => "signer.signed",
            DomainEvent::EnvelopeCompleted { .. } => "envelope.completed",
            DomainEvent::EnvelopeDeclined { .. } => "envelope.declined",
            DomainEvent::EnvelopeVoided { .. } => "envelope.voided",
            DomainEvent::EnvelopeExpired { .. } => "envelope.expired",
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            DomainEvent::EnvelopeSent { tenant_id, .. }
            | DomainEvent::SignerTurnStarted { tenant_id, .. }
            | DomainEvent::SignerSigned { tenant_id, .. }
            | DomainEvent::EnvelopeCompleted { tenant_id, .. }
            | DomainEvent::EnvelopeDeclined { tenant_id, .. }
            | DomainEvent::EnvelopeVoided { tenant_id, .. }
            | DomainEvent::EnvelopeExpired { tenant_id, .. } => tenant_id,
        }
    }

    pub fn envelope_id(&self) -> &str {
        match self {
            DomainEvent::EnvelopeSent { envelope_id, .. }
            | DomainEvent::SignerTurnStarted { envelope_id, .. }
            | DomainEvent::SignerSigned { envelope_id, .. }
            | DomainEvent::EnvelopeCompleted { envelope_id, .. }
            | DomainEvent::EnvelopeDeclined { envelope_id, .. }
            | DomainEvent::EnvelopeVoided { envelope_id, .. }
            | DomainEvent::EnvelopeExpired { envelope_id, .. } => envelope_id,
        }
    }

    /// Build an envelope.sent event from a freshly sent envelope
    pub fn envelope_sent(envelope: &Envelope) -> Self {
        DomainEvent::EnvelopeSent {
            tenant_id: envelope.tenant_id.clone(),
            envelope_id: envelope.id.clone(),
            title: envelope.title.clone(),
            sender_email: envelope.sender_email.clone(),
            signer_count: envelope.signers.len(),
            expires_at: envelope.expires_at.unwrap_or(0),
        }
    }

    /// Build a signer.turn_started event carrying the one-time token
    pub fn signer_turn_started(envelope: &Envelope, signer: &Signer, access_token: String) -> Self {
        DomainEvent::SignerTurnStarted {
            tenant_id: envelope.tenant_id.clone(),
            envelope_id: envelope.id.clone(),
            signer_id: signer.id.clone(),
            signer_email: signer.email.clone(),
            signer_name: signer.name.clone(),
            title: envelope.title.clone(),
            access_token,
            expires_at: envelope.expires_at.unwrap_or(0),
        }
    }

    pub fn signer_signed(envelope: &Envelope, signer: &Signer, signed_at: i64) -> Self {
        DomainEvent::SignerSigned {
            tenant_id: envelope.tenant_id.clone(),
            envelope_id: envelope.id.clone(),
            signer_id: signer.id.clone(),
            signer_email: signer.email.clone(),
            signed_at,
        }
    }

    pub fn envelope_completed(envelope: &Envelope, completed_document_key: String) -> Self {
        DomainEvent::EnvelopeCompleted {
            tenant_id: envelope.tenant_id.clone(),
            envelope_id: envelope.id.clone(),
            title: envelope.title.clone(),
            sender_email: envelope.sender_email.clone(),
            completed_document_key,
            signer_emails: envelope.signers.iter().map(|s| s.email.clone()).collect(),
        }
    }

    pub fn envelope_declined(envelope: &Envelope, signer: &Signer, reason: String) -> Self {
        DomainEvent::EnvelopeDeclined {
            tenant_id: envelope.tenant_id.clone(),
            envelope_id: envelope.id.clone(),
            title: envelope.title.clone(),
            sender_email: envelope.sender_email.clone(),
            signer_id: signer.id.clone(),
            signer_email: signer.email.clone(),
            reason,
        }
    }

    pub fn envelope_voided(envelope: &Envelope) -> Self {
        DomainEvent::EnvelopeVoided {
            tenant_id: envelope.tenant_id.clone(),
            envelope_id: envelope.id.clone(),
            title: envelope.title.clone(),
            sender_email: envelope.sender_email.clone(),
        }
    }

    pub fn envelope_expired(envelope: &Envelope) -> Self {
        DomainEvent::EnvelopeExpired {
            tenant_id: envelope.tenant_id.clone(),
            envelope_id: envelope.id.clone(),
            title: envelope.title.clone(),
            sender_email: envelope.sender_email.clone(),
        }
    }
}

/// Publication state of an outbox record (Req 4.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
        }
    }
}

/// One row of the transactional outbox (Req 4.1)
///
/// Written in the same DynamoDB transaction as the envelope mutation it
/// belongs to, then relayed to EventBridge off the table stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: String,
    pub tenant_id: String,
    pub envelope_id: String,
    pub source: String,
    pub detail_type: String,
    /// The serialized DomainEvent, published verbatim as the event detail
    pub event_json: String,
    pub status: OutboxStatus,
    pub created_at: i64,
    pub published_at: Option<i64>,
}

impl OutboxRecord {
    /// Wrap a domain event into a pending outbox record
    pub fn new(event: &DomainEvent, now: i64) -> Result<Self, serde_json::Error> {
        Ok(OutboxRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: event.tenant_id().to_string(),
            envelope_id: event.envelope_id().to_string(),
            source: EVENT_SOURCE.to_string(),
            detail_type: event.detail_type().to_string(),
            event_json: serde_json::to_string(event)?,
            status: OutboxStatus::Pending,
            created_at: now,
            published_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::NewEnvelope;
    use crate::domain::envelope_status::SigningOrder;

    fn sample_envelope() -> Envelope {
        let mut envelope = Envelope::create(
            NewEnvelope {
                id: "env-1".to_string(),
                tenant_id: "tenant-1".to_string(),
                title: "NDA".to_string(),
                sender_email: "sender@example.com".to_string(),
                document_key: "doc.pdf".to_string(),
                signing_order: SigningOrder::Sequential,
                signers: vec![
                    Signer::new("s1".to_string(), "a@example.com".to_string(), "A".to_string(), 1),
                    Signer::new("s2".to_string(), "b@example.com".to_string(), "B".to_string(), 2),
                ],
            },
            1_700_000_000,
        )
        .unwrap();
        envelope.send(1_700_100_000, 1_700_000_001).unwrap();
        envelope
    }

    // ==================== Detail Type Tests (Req 5.1) ====================

    #[test]
    fn test_detail_type_names() {
        let envelope = sample_envelope();
        let signer = envelope.find_signer("s1").unwrap();
        assert_eq!(
            DomainEvent::envelope_sent(&envelope).detail_type(),
            "envelope.sent"
        );
        assert_eq!(
            DomainEvent::signer_turn_started(&envelope, signer, "tok".to_string()).detail_type(),
            "signer.turn_started"
        );
        assert_eq!(
            DomainEvent::signer_signed(&envelope, signer, 1).detail_type(),
            "signer.signed"
        );
        assert_eq!(
            DomainEvent::envelope_completed(&envelope, "done.pdf".to_string()).detail_type(),
            "envelope.completed"
        );
        assert_eq!(
            DomainEvent::envelope_declined(&envelope, signer, "no".to_string()).detail_type(),
            "envelope.declined"
        );
        assert_eq!(
            DomainEvent::envelope_voided(&envelope).detail_type(),
            "envelope.voided"
        );
        assert_eq!(
            DomainEvent::envelope_expired(&envelope).detail_type(),
            "envelope.expired"
        );
    }

    #[test]
    fn test_serialized_event_type_matches_detail_type() {
        let envelope = sample_envelope();
        let event = DomainEvent::envelope_sent(&envelope);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "envelope.sent");
        assert_eq!(json["tenant_id"], "tenant-1");
        assert_eq!(json["signer_count"], 2);
        assert_eq!(json["expires_at"], 1_700_100_000);
    }

    #[test]
    fn test_event_serde_round_trip() {
        let envelope = sample_envelope();
        let signer = envelope.find_signer("s2").unwrap();
        let event = DomainEvent::signer_turn_started(&envelope, signer, "secret-token".to_string());
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_completed_event_lists_all_signers() {
        let envelope = sample_envelope();
        let event = DomainEvent::envelope_completed(&envelope, "done.pdf".to_string());
        let DomainEvent::EnvelopeCompleted { signer_emails, .. } = &event else {
            panic!("wrong variant");
        };
        assert_eq!(
            signer_emails,
            &vec!["a@example.com".to_string(), "b@example.com".to_string()]
        );
    }

    // ==================== Outbox Record Tests (Req 4.1) ====================

    #[test]
    fn test_outbox_record_starts_pending() {
        let envelope = sample_envelope();
        let event = DomainEvent::envelope_sent(&envelope);
        let record = OutboxRecord::new(&event, 1_700_000_002).unwrap();
        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.published_at, None);
        assert_eq!(record.source, EVENT_SOURCE);
        assert_eq!(record.detail_type, "envelope.sent");
        assert_eq!(record.tenant_id, "tenant-1");
        assert_eq!(record.envelope_id, "env-1");
        assert_eq!(record.created_at, 1_700_000_002);
    }

    #[test]
    fn test_outbox_record_event_json_round_trips() {
        let envelope = sample_envelope();
        let event = DomainEvent::envelope_voided(&envelope);
        let record = OutboxRecord::new(&event, 0).unwrap();
        let back: DomainEvent = serde_json::from_str(&record.event_json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_outbox_record_ids_are_unique() {
        let envelope = sample_envelope();
        let event = DomainEvent::envelope_sent(&envelope);
        let a = OutboxRecord::new(&event, 0).unwrap();
        let b = OutboxRecord::new(&event, 0).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_outbox_status_as_str() {
        assert_eq!(OutboxStatus::Pending.as_str(), "pending");
        assert_eq!(OutboxStatus::Published.as_str(), "published");
    }
}
