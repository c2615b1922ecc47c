/// 無効化ハンドラ
///
/// 送信者による封筒の取り下げ。署名者と違って送信者はテナントの
/// API認証で識別されるため、アクセストークンは要求しない。
/// 要件: 1.6, 4.1
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::{DomainEvent, EnvelopeError, EnvelopeStatus, OutboxRecord};
use crate::infrastructure::{EnvelopeRepository, EnvelopeRepositoryError, UpdateResult};

/// 無効化ハンドラのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VoidError {
    /// 封筒が存在しない
    #[error("envelope not found: {0}")]
    NotFound(String),

    /// 封筒の状態遷移に失敗（既に終端状態）
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

impl From<EnvelopeError> for VoidError {
    fn from(err: EnvelopeError) -> Self {
        VoidError::Transition(err)
    }
}

impl From<EnvelopeRepositoryError> for VoidError {
    fn from(err: EnvelopeRepositoryError) -> Self {
        VoidError::RepositoryError(err.to_string())
    }
}

impl From<serde_json::Error> for VoidError {
    fn from(err: serde_json::Error) -> Self {
        VoidError::EventError(err.to_string())
    }
}

/// 無効化リクエスト
#[derive(Debug, Clone, Deserialize)]
pub struct VoidRequest {
    pub tenant_id: String,
    pub envelope_id: String,
}

/// 無効化レスポンス
#[derive(Debug, Clone, Serialize)]
pub struct VoidResponse {
    pub envelope_id: String,
    pub status: EnvelopeStatus,
}

/// 無効化リクエストを処理するハンドラ
pub struct VoidEnvelopeHandler<R>
where
    R: EnvelopeRepository,
{
    /// 封筒リポジトリ
    envelope_repo: R,
}

impl<R> VoidEnvelopeHandler<R>
where
    R: EnvelopeRepository,
{
    /// 新しいVoidEnvelopeHandlerを作成
    pub fn new(envelope_repo: R) -> Self {
        Self { envelope_repo }
    }

    /// 無効化リクエストを処理
    ///
    /// 無効化により未使用のアクセストークンはすべて失効する。
    /// 署名の進行中に無効化が競合した場合は条件付き書き込みが
    /// 片方を弾く。
    ///
    /// 要件: 1.6
    pub async fn handle(&self, request: VoidRequest, now: i64) -> Result<VoidResponse, VoidError> {
        let Some(mut envelope) = self
            .envelope_repo
            .get(&request.tenant_id, &request.envelope_id)
            .await?
        else {
            return Err(VoidError::NotFound(request.envelope_id));
        };

        // 条件付き書き込みは読み取り時点の状態を期待値にする
        let prev_status = envelope.status;
        envelope.void(now)?;

        let event = DomainEvent::envelope_voided(&envelope);
        let records = vec![OutboxRecord::new(&event, now)?];

        match self
            .envelope_repo
            .update_with_outbox(&envelope, prev_status, &records)
            .await?
        {
            UpdateResult::Updated => {}
            UpdateResult::Conflict => return Err(VoidError::Conflict),
        }

        info!(
            tenant_id = %envelope.tenant_id,
            envelope_id = %envelope.id,
            "封筒を無効化"
        );

        Ok(VoidResponse {
            envelope_id: envelope.id,
            status: envelope.status,
        })
    }
}
