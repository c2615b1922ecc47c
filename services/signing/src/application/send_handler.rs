/// 封筒送信ハンドラ
///
/// 封筒の作成と送信を一度に行う。検証済みの封筒は即座にSentになり、
/// 最初の順番グループの署名者にアクセストークンが発行される。
/// 封筒本体・envelope.sentイベント・signer.turn_startedイベントは
/// 同一トランザクションで書き込まれる。
/// 要件: 1.1, 1.3, 2.2, 2.3, 4.1
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    AccessToken, DomainEvent, Envelope, EnvelopeError, NewEnvelope, OutboxRecord, Signer,
    SigningOrder,
};
use crate::infrastructure::{CreateResult, EnvelopeRepository, EnvelopeRepositoryError};

/// 送信ハンドラのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SendError {
    /// 封筒の検証・遷移に失敗（署名者なし、重複メール等）
    #[error("invalid envelope: {0}")]
    Validation(EnvelopeError),

    /// 同じIDの封筒が既に存在
    #[error("envelope already exists: {0}")]
    AlreadyExists(String),

    /// リポジトリエラー
    #[error("Repository error: {0}")]
    RepositoryError(String),

    /// イベントのシリアライズに失敗
    #[error("Event serialization error: {0}")]
    EventError(String),
}

impl From<EnvelopeError> for SendError {
    fn from(err: EnvelopeError) -> Self {
        SendError::Validation(err)
    }
}

impl From<EnvelopeRepositoryError> for SendError {
    fn from(err: EnvelopeRepositoryError) -> Self {
        SendError::RepositoryError(err.to_string())
    }
}

impl From<serde_json::Error> for SendError {
    fn from(err: serde_json::Error) -> Self {
        SendError::EventError(err.to_string())
    }
}

/// 署名者の入力
#[derive(Debug, Clone, Deserialize)]
pub struct SignerRequest {
    pub email: String,
    pub name: String,
    /// 1始まり。同値の署名者は並行グループ
    pub routing_order: u32,
}

/// 封筒送信リクエスト
#[derive(Debug, Clone, Deserialize)]
pub struct SendEnvelopeRequest {
    pub tenant_id: String,
    pub title: String,
    pub sender_email: String,
    /// 元文書のS3キー
    pub document_key: String,
    pub signing_order: SigningOrder,
    pub signers: Vec<SignerRequest>,
    /// 有効期間（秒）。省略時はハンドラのデフォルト
    pub ttl_secs: Option<i64>,
}

/// 順番が始まった署名者とそのアクセストークン
///
/// トークンはこの応答と通知イベントにのみ現れる。保存されるのは
/// ダイジェストだけなので、後から再取得はできない。
#[derive(Debug, Clone, Serialize)]
pub struct SignerTokenInfo {
    pub signer_id: String,
    pub email: String,
    pub access_token: String,
}

/// 封筒送信レスポンス
#[derive(Debug, Clone, Serialize)]
pub struct SendEnvelopeResponse {
    pub envelope_id: String,
    pub expires_at: i64,
    /// 最初の順番グループの署名者
    pub active_signers: Vec<SignerTokenInfo>,
}

/// 封筒の作成と送信を処理するハンドラ
pub struct SendEnvelopeHandler<R>
where
    R: EnvelopeRepository,
{
    /// 封筒リポジトリ
    envelope_repo: R,
    /// ttl_secs省略時の有効期間（秒）
    default_ttl_secs: i64,
}

impl<R> SendEnvelopeHandler<R>
where
    R: EnvelopeRepository,
{
    /// 新しいSendEnvelopeHandlerを作成
    pub fn new(envelope_repo: R, default_ttl_secs: i64) -> Self {
        Self {
            envelope_repo,
            default_ttl_secs,
        }
    }

    /// 封筒送信リクエストを処理
    ///
    /// # 処理フロー
    /// 1. 封筒と署名者のIDを採番して集約を作成
    /// 2. 有効期限を設定して送信（Draft -> Sent）
    /// 3. 最初の順番グループにトークンを発行
    /// 4. 封筒とイベントを原子的に書き込み
    ///
    /// 要件: 1.1, 1.3, 2.3, 4.1
    pub async fn handle(
        &self,
        request: SendEnvelopeRequest,
        now: i64,
    ) -> Result<SendEnvelopeResponse, SendError> {
        let envelope_id = Uuid::new_v4().to_string();
        let signers = request
            .signers
            .into_iter()
            .map(|s| Signer::new(Uuid::new_v4().to_string(), s.email, s.name, s.routing_order))
            .collect();

        let mut envelope = Envelope::create(
            NewEnvelope {
                id: envelope_id,
                tenant_id: request.tenant_id,
                title: request.title,
                sender_email: request.sender_email,
                document_key: request.document_key,
                signing_order: request.signing_order,
                signers,
            },
            now,
        )?;

        let ttl_secs = request.ttl_secs.unwrap_or(self.default_ttl_secs);
        let expires_at = now + ttl_secs;
        let first_turn = envelope.send(expires_at, now)?;

        // 最初の順番グループにトークンを発行
        let mut events = vec![DomainEvent::envelope_sent(&envelope)];
        let mut active_signers = Vec::with_capacity(first_turn.len());
        for signer_id in &first_turn {
            let (token, digest) = AccessToken::generate();
            envelope.start_turn(signer_id, digest, now)?;
            // start_turnが成功した時点で署名者は必ず存在する
            let Some(signer) = envelope.find_signer(signer_id) else {
                return Err(SendError::Validation(EnvelopeError::UnknownSigner(
                    signer_id.clone(),
                )));
            };
            events.push(DomainEvent::signer_turn_started(
                &envelope,
                signer,
                token.clone(),
            ));
            active_signers.push(SignerTokenInfo {
                signer_id: signer.id.clone(),
                email: signer.email.clone(),
                access_token: token,
            });
        }

        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            records.push(OutboxRecord::new(event, now)?);
        }

        match self
            .envelope_repo
            .create_with_outbox(&envelope, &records)
            .await?
        {
            CreateResult::Created => {}
            CreateResult::AlreadyExists => {
                return Err(SendError::AlreadyExists(envelope.id.clone()));
            }
        }

        info!(
            tenant_id = %envelope.tenant_id,
            envelope_id = %envelope.id,
            signer_count = envelope.signers.len(),
            active_count = active_signers.len(),
            expires_at = expires_at,
            "封筒を送信"
        );

        Ok(SendEnvelopeResponse {
            envelope_id: envelope.id,
            expires_at,
            active_signers,
        })
    }
}
