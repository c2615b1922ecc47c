/// Envelope and signer lifecycle states
///
/// Requirements: 1.1, 1.2, 2.1
use serde::{Deserialize, Serialize};

/// Lifecycle state of an envelope
///
/// Transitions:
/// - Draft -> Sent (send)
/// - Sent -> Completed (last signature embedded)
/// - Sent -> Declined (any signer declines)
/// - Draft | Sent -> Voided (sender withdraws)
/// - Sent -> Expired (deadline passed)
///
/// Completed, Declined, Voided and Expired are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Draft,
    Sent,
    Completed,
    Declined,
    Voided,
    Expired,
}

impl EnvelopeStatus {
    /// Stable string form, used for the status index attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeStatus::Draft => "draft",
            EnvelopeStatus::Sent => "sent",
            EnvelopeStatus::Completed => "completed",
            EnvelopeStatus::Declined => "declined",
            EnvelopeStatus::Voided => "voided",
            EnvelopeStatus::Expired => "expired",
        }
    }

    /// Terminal states accept no further signer or sender actions (Req 1.2)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnvelopeStatus::Completed
                | EnvelopeStatus::Declined
                | EnvelopeStatus::Voided
                | EnvelopeStatus::Expired
        )
    }

    /// Only a sent envelope accepts signer actions
    pub fn is_open(&self) -> bool {
        matches!(self, EnvelopeStatus::Sent)
    }
}

impl std::fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-signer state within an envelope (Req 2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    /// Not yet this signer's turn
    Pending,
    /// Turn has started, an access token has been issued
    NotifiedTurn,
    Signed,
    Declined,
}

impl SignerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerStatus::Pending => "pending",
            SignerStatus::NotifiedTurn => "notified_turn",
            SignerStatus::Signed => "signed",
            SignerStatus::Declined => "declined",
        }
    }
}

impl std::fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How signer turns are scheduled (Req 2.2)
///
/// Sequential walks routing_order groups in ascending order; signers
/// sharing a routing_order act as one parallel group. Parallel opens
/// every signer's turn at send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningOrder {
    Sequential,
    Parallel,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== 1.2 Terminal State Tests ====================

    #[test]
    fn test_draft_is_not_terminal() {
        assert!(!EnvelopeStatus::Draft.is_terminal());
    }

    #[test]
    fn test_sent_is_not_terminal() {
        assert!(!EnvelopeStatus::Sent.is_terminal());
    }

    #[test]
    fn test_completed_is_terminal() {
        assert!(EnvelopeStatus::Completed.is_terminal());
    }

    #[test]
    fn test_declined_is_terminal() {
        assert!(EnvelopeStatus::Declined.is_terminal());
    }

    #[test]
    fn test_voided_is_terminal() {
        assert!(EnvelopeStatus::Voided.is_terminal());
    }

    #[test]
    fn test_expired_is_terminal() {
        assert!(EnvelopeStatus::Expired.is_terminal());
    }

    // ==================== Open State Tests ====================

    #[test]
    fn test_only_sent_is_open() {
        assert!(EnvelopeStatus::Sent.is_open());
        assert!(!EnvelopeStatus::Draft.is_open());
        assert!(!EnvelopeStatus::Completed.is_open());
        assert!(!EnvelopeStatus::Declined.is_open());
        assert!(!EnvelopeStatus::Voided.is_open());
        assert!(!EnvelopeStatus::Expired.is_open());
    }

    // ==================== String Form Tests ====================

    #[test]
    fn test_envelope_status_as_str() {
        assert_eq!(EnvelopeStatus::Draft.as_str(), "draft");
        assert_eq!(EnvelopeStatus::Sent.as_str(), "sent");
        assert_eq!(EnvelopeStatus::Completed.as_str(), "completed");
        assert_eq!(EnvelopeStatus::Declined.as_str(), "declined");
        assert_eq!(EnvelopeStatus::Voided.as_str(), "voided");
        assert_eq!(EnvelopeStatus::Expired.as_str(), "expired");
    }

    #[test]
    fn test_signer_status_as_str() {
        assert_eq!(SignerStatus::Pending.as_str(), "pending");
        assert_eq!(SignerStatus::NotifiedTurn.as_str(), "notified_turn");
        assert_eq!(SignerStatus::Signed.as_str(), "signed");
        assert_eq!(SignerStatus::Declined.as_str(), "declined");
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(EnvelopeStatus::Sent.to_string(), "sent");
        assert_eq!(SignerStatus::NotifiedTurn.to_string(), "notified_turn");
    }

    // ==================== Serde Tests ====================

    #[test]
    fn test_envelope_status_serde_snake_case() {
        let json = serde_json::to_string(&EnvelopeStatus::Sent).unwrap();
        assert_eq!(json, "\"sent\"");
        let back: EnvelopeStatus = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(back, EnvelopeStatus::Expired);
    }

    #[test]
    fn test_signing_order_serde_snake_case() {
        let json = serde_json::to_string(&SigningOrder::Sequential).unwrap();
        assert_eq!(json, "\"sequential\"");
        let back: SigningOrder = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(back, SigningOrder::Parallel);
    }
}
