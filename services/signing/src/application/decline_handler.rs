/// 拒否ハンドラ
///
/// 署名者による拒否を記録する。いずれかの署名者が拒否した時点で
/// 封筒全体が終端状態のDeclinedになり、未使用トークンは失効する。
/// 要件: 1.5, 2.4, 4.1
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::{
    DomainEvent, EnvelopeError, EnvelopeStatus, OutboxRecord, SigningValidator, ValidationError,
};
use crate::infrastructure::{EnvelopeRepository, EnvelopeRepositoryError, UpdateResult};

/// 拒否ハンドラのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeclineError {
    /// 封筒が存在しない
    #[error("envelope not found: {0}")]
    NotFound(String),

    /// リクエストの検証に失敗
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    /// 封筒の状態遷移に失敗
    #[error("invalid transition: {0}")]
    Transition(EnvelopeError),

    /// リポジトリエラー
    #[error("Repository error: {0}")]
    RepositoryError(String),

    /// イベントのシリアライズに失敗
    #[error("Event serialization error: {0}")]
    EventError(String),

    /// 並行更新と競合した
    #[error("envelope was modified concurrently")]
    Conflict,
}

impl From<ValidationError> for DeclineError {
    fn from(err: ValidationError) -> Self {
        DeclineError::Validation(err)
    }
}

impl From<EnvelopeError> for DeclineError {
    fn from(err: EnvelopeError) -> Self {
        DeclineError::Transition(err)
    }
}

impl From<EnvelopeRepositoryError> for DeclineError {
    fn from(err: EnvelopeRepositoryError) -> Self {
        DeclineError::RepositoryError(err.to_string())
    }
}

impl From<serde_json::Error> for DeclineError {
    fn from(err: serde_json::Error) -> Self {
        DeclineError::EventError(err.to_string())
    }
}

/// 拒否リクエスト
#[derive(Debug, Clone, Deserialize)]
pub struct DeclineRequest {
    pub tenant_id: String,
    pub envelope_id: String,
    pub signer_id: String,
    pub access_token: String,
    /// 署名者が入力した拒否理由
    pub reason: String,
}

/// 拒否レスポンス
#[derive(Debug, Clone, Serialize)]
pub struct DeclineResponse {
    pub envelope_id: String,
    pub status: EnvelopeStatus,
}

/// 拒否リクエストを処理するハンドラ
pub struct DeclineEnvelopeHandler<R>
where
    R: EnvelopeRepository,
{
    /// 封筒リポジトリ
    envelope_repo: R,
}

impl<R> DeclineEnvelopeHandler<R>
where
    R: EnvelopeRepository,
{
    /// 新しいDeclineEnvelopeHandlerを作成
    pub fn new(envelope_repo: R) -> Self {
        Self { envelope_repo }
    }

    /// 拒否リクエストを処理
    ///
    /// 検証条件は署名と同一。拒否が成立すると封筒はDeclinedになり、
    /// envelope.declinedイベントが同一トランザクションで書き込まれる。
    ///
    /// 要件: 1.5, 2.4
    pub async fn handle(
        &self,
        request: DeclineRequest,
        now: i64,
    ) -> Result<DeclineResponse, DeclineError> {
        let Some(mut envelope) = self
            .envelope_repo
            .get(&request.tenant_id, &request.envelope_id)
            .await?
        else {
            return Err(DeclineError::NotFound(request.envelope_id));
        };

        SigningValidator::validate_decline(
            &envelope,
            &request.signer_id,
            &request.access_token,
            now,
        )?;

        envelope.decline(&request.signer_id, request.reason.clone(), now)?;
        // declineが成功した時点で署名者は必ず存在する
        let Some(signer) = envelope.find_signer(&request.signer_id) else {
            return Err(DeclineError::Transition(EnvelopeError::UnknownSigner(
                request.signer_id.clone(),
            )));
        };
        let event = DomainEvent::envelope_declined(&envelope, signer, request.reason);
        let records = vec![OutboxRecord::new(&event, now)?];

        match self
            .envelope_repo
            .update_with_outbox(&envelope, EnvelopeStatus::Sent, &records)
            .await?
        {
            UpdateResult::Updated => {}
            UpdateResult::Conflict => return Err(DeclineError::Conflict),
        }

        info!(
            tenant_id = %envelope.tenant_id,
            envelope_id = %envelope.id,
            signer_id = %request.signer_id,
            "封筒が拒否された"
        );

        Ok(DeclineResponse {
            envelope_id: envelope.id,
            status: envelope.status,
        })
    }
}
