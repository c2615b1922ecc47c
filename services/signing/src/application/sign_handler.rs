/// 署名ハンドラ
///
/// 署名者の署名を記録し、進行方式に従って次の順番グループを開始する。
/// 最後の署名者だった場合は署名済みPDFを生成して封筒を完了させる。
/// 状態更新とイベントは条件付きトランザクションで書き込まれるため、
/// 並行する署名リクエストは片方だけが成立する。
/// 要件: 1.4, 2.3, 2.4, 3.7, 4.1
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::application::completion::{self, CompletionError};
use crate::domain::{
    AccessToken, DomainEvent, EnvelopeError, EnvelopeStatus, OutboxRecord, SignatureOutcome,
    SigningValidator, ValidationError,
};
use crate::infrastructure::{
    CertificateSource, DocumentStore, EnvelopeRepository, EnvelopeRepositoryError, RemoteSigner,
    UpdateResult,
};

/// 署名ハンドラのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignError {
    /// 封筒が存在しない
    #[error("envelope not found: {0}")]
    NotFound(String),

    /// リクエストの検証に失敗（トークン不一致、順番違い等）
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    /// 封筒の状態遷移に失敗
    #[error("invalid transition: {0}")]
    Transition(EnvelopeError),

    /// 署名済みPDFの生成に失敗
    #[error("completion failed: {0}")]
    Completion(String),

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

impl From<ValidationError> for SignError {
    fn from(err: ValidationError) -> Self {
        SignError::Validation(err)
    }
}

impl From<EnvelopeError> for SignError {
    fn from(err: EnvelopeError) -> Self {
        SignError::Transition(err)
    }
}

impl From<CompletionError> for SignError {
    fn from(err: CompletionError) -> Self {
        SignError::Completion(err.to_string())
    }
}

impl From<EnvelopeRepositoryError> for SignError {
    fn from(err: EnvelopeRepositoryError) -> Self {
        SignError::RepositoryError(err.to_string())
    }
}

impl From<serde_json::Error> for SignError {
    fn from(err: serde_json::Error) -> Self {
        SignError::EventError(err.to_string())
    }
}

/// 署名リクエスト
#[derive(Debug, Clone, Deserialize)]
pub struct SignRequest {
    pub tenant_id: String,
    pub envelope_id: String,
    pub signer_id: String,
    pub access_token: String,
}

/// 署名レスポンス
///
/// 次の署名者のトークンは応答には含めない。トークンは
/// signer.turn_startedイベント経由で本人にだけ届く。
#[derive(Debug, Clone, Serialize)]
pub struct SignResponse {
    pub envelope_id: String,
    pub status: EnvelopeStatus,
    /// この署名で封筒が完了したか
    pub completed: bool,
}

/// 署名リクエストを処理するハンドラ
pub struct SignEnvelopeHandler<R, S, C, D>
where
    R: EnvelopeRepository,
    S: RemoteSigner,
    C: CertificateSource,
    D: DocumentStore,
{
    /// 封筒リポジトリ
    envelope_repo: R,
    /// KMS署名クライアント
    remote_signer: S,
    /// 署名証明書ソース
    certificates: C,
    /// 文書ストア
    documents: D,
}

impl<R, S, C, D> SignEnvelopeHandler<R, S, C, D>
where
    R: EnvelopeRepository,
    S: RemoteSigner,
    C: CertificateSource,
    D: DocumentStore,
{
    /// 新しいSignEnvelopeHandlerを作成
    pub fn new(envelope_repo: R, remote_signer: S, certificates: C, documents: D) -> Self {
        Self {
            envelope_repo,
            remote_signer,
            certificates,
            documents,
        }
    }

    /// 署名リクエストを処理
    ///
    /// # 処理フロー
    /// 1. 封筒を取得してトークンと順番を検証
    /// 2. 署名を記録
    /// 3. 次グループの開始、または署名済みPDFの生成と完了
    /// 4. 封筒とイベントを条件付きで原子的に書き込み
    ///
    /// 署名済みPDFのアップロードは書き込み前に行われる。書き込みが
    /// 競合した場合は孤児オブジェクトが残るが、キーは決定的なので
    /// 成立した側のリクエストが同じキーを上書きする。
    ///
    /// 要件: 1.4, 2.3, 2.4, 3.7
    pub async fn handle(&self, request: SignRequest, now: i64) -> Result<SignResponse, SignError> {
        let Some(mut envelope) = self
            .envelope_repo
            .get(&request.tenant_id, &request.envelope_id)
            .await?
        else {
            return Err(SignError::NotFound(request.envelope_id));
        };

        SigningValidator::validate_sign(&envelope, &request.signer_id, &request.access_token, now)?;

        let outcome = envelope.record_signature(&request.signer_id, now)?;
        // record_signatureが成功した時点で署名者は必ず存在する
        let Some(signer) = envelope.find_signer(&request.signer_id) else {
            return Err(SignError::Transition(EnvelopeError::UnknownSigner(
                request.signer_id.clone(),
            )));
        };
        let mut events = vec![DomainEvent::signer_signed(&envelope, signer, now)];

        let mut completed = false;
        match outcome {
            SignatureOutcome::Progressed { next_turn } => {
                // 逐次進行で次グループに進んだ場合のみ非空
                for signer_id in &next_turn {
                    let (token, digest) = AccessToken::generate();
                    envelope.start_turn(signer_id, digest, now)?;
                    let Some(signer) = envelope.find_signer(signer_id) else {
                        return Err(SignError::Transition(EnvelopeError::UnknownSigner(
                            signer_id.clone(),
                        )));
                    };
                    events.push(DomainEvent::signer_turn_started(&envelope, signer, token));
                }
            }
            SignatureOutcome::ReadyToComplete => {
                let completed_key = completion::seal_document(
                    &self.remote_signer,
                    &self.certificates,
                    &self.documents,
                    &envelope,
                    now,
                )
                .await?;
                envelope.complete(completed_key.clone(), now)?;
                events.push(DomainEvent::envelope_completed(&envelope, completed_key));
                completed = true;
            }
        }

        let mut records = Vec::with_capacity(events.len());
        for event in &events {
            records.push(OutboxRecord::new(event, now)?);
        }

        match self
            .envelope_repo
            .update_with_outbox(&envelope, EnvelopeStatus::Sent, &records)
            .await?
        {
            UpdateResult::Updated => {}
            UpdateResult::Conflict => return Err(SignError::Conflict),
        }

        info!(
            tenant_id = %envelope.tenant_id,
            envelope_id = %envelope.id,
            signer_id = %request.signer_id,
            status = %envelope.status,
            completed = completed,
            "署名を記録"
        );

        Ok(SignResponse {
            envelope_id: envelope.id,
            status: envelope.status,
            completed,
        })
    }
}
