// 署名者操作の検証ロジック
//
// 署名・拒否リクエストを封筒の状態とアクセストークンに対して検証する
// 純粋関数群。外部依存を持たない純粋なドメインロジック。
// 要件: 2.3, 2.4, 7.2, 7.3

use thiserror::Error;

use super::access_token::AccessToken;
use super::envelope::Envelope;
use super::envelope_status::{EnvelopeStatus, SignerStatus};

/// 署名者操作のバリデーションエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// 封筒が署名を受け付ける状態にない
    #[error("envelope is not open for signing: {0}")]
    EnvelopeNotOpen(EnvelopeStatus),
    /// 封筒の有効期限が過ぎている
    #[error("envelope has expired")]
    EnvelopeExpired,
    /// 指定された署名者が存在しない
    #[error("unknown signer: {0}")]
    UnknownSigner(String),
    /// 署名者が既に署名または拒否を終えている
    #[error("signer has already acted: {0}")]
    AlreadyActed(String),
    /// 署名者の順番がまだ始まっていない
    #[error("turn has not started for signer: {0}")]
    NotYourTurn(String),
    /// 提示されたアクセストークンが一致しない
    #[error("access token does not match")]
    TokenMismatch,
}

/// 署名者操作のバリデータ
///
/// ステートレスな純粋関数として実装。
pub struct SigningValidator;

impl SigningValidator {
    /// 署名リクエストを検証（要件 2.4, 7.2）
    ///
    /// チェック内容:
    /// - 封筒が送信済み状態である
    /// - 有効期限が過ぎていない（境界時刻ちょうどは期限切れ）
    /// - 署名者が存在し、順番が始まっている（NotifiedTurn）
    /// - 提示トークンのダイジェストが保存済みダイジェストと一致する
    pub fn validate_sign(
        envelope: &Envelope,
        signer_id: &str,
        token: &str,
        now: i64,
    ) -> Result<(), ValidationError> {
        Self::validate_action(envelope, signer_id, token, now)
    }

    /// 拒否リクエストを検証（要件 2.4, 7.3）
    ///
    /// 署名と同じ条件。順番が始まった署名者のみ拒否できる。
    pub fn validate_decline(
        envelope: &Envelope,
        signer_id: &str,
        token: &str,
        now: i64,
    ) -> Result<(), ValidationError> {
        Self::validate_action(envelope, signer_id, token, now)
    }

    /// 署名者による文書閲覧リクエストを検証（要件 6.1, 7.2）
    ///
    /// 署名と同じ条件。順番が進行中の署名者のみ元文書を閲覧できる。
    pub fn validate_view(
        envelope: &Envelope,
        signer_id: &str,
        token: &str,
        now: i64,
    ) -> Result<(), ValidationError> {
        Self::validate_action(envelope, signer_id, token, now)
    }

    fn validate_action(
        envelope: &Envelope,
        signer_id: &str,
        token: &str,
        now: i64,
    ) -> Result<(), ValidationError> {
        if !envelope.status.is_open() {
            return Err(ValidationError::EnvelopeNotOpen(envelope.status));
        }
        // 境界時刻ちょうど（now == expires_at）は期限切れ扱い
        if envelope.expires_at.is_some_and(|deadline| now >= deadline) {
            return Err(ValidationError::EnvelopeExpired);
        }

        let signer = envelope
            .find_signer(signer_id)
            .ok_or_else(|| ValidationError::UnknownSigner(signer_id.to_string()))?;

        match signer.status {
            SignerStatus::Signed | SignerStatus::Declined => {
                return Err(ValidationError::AlreadyActed(signer_id.to_string()));
            }
            SignerStatus::Pending => {
                return Err(ValidationError::NotYourTurn(signer_id.to_string()));
            }
            SignerStatus::NotifiedTurn => {}
        }

        // NotifiedTurnであればダイジェストは必ず保存されているが、
        // 欠けていた場合はトークン照合不能として順番未開始と同じ扱いにする
        let Some(stored_digest) = signer.token_digest.as_deref() else {
            return Err(ValidationError::NotYourTurn(signer_id.to_string()));
        };
        if !AccessToken::verify(token, stored_digest) {
            return Err(ValidationError::TokenMismatch);
        }

        Ok(())
    }
}
