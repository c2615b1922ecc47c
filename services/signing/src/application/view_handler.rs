/// 文書閲覧ハンドラ
///
/// 署名対象文書への期限付きURLを発行する。呼び出し元は2種類ある:
/// アクセストークンを提示する署名者と、テナントのAPI認証で識別
/// される送信者。文書バイト列は返さず、S3の署名付きURLを返す。
/// 要件: 6.1, 7.2
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::{EnvelopeStatus, SigningValidator};
use crate::infrastructure::{
    DocumentStore, DocumentStoreError, EnvelopeRepository, EnvelopeRepositoryError,
};

/// 閲覧ハンドラのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ViewError {
    /// 封筒が存在しない
    #[error("envelope not found: {0}")]
    NotFound(String),

    /// 閲覧する権限がない
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// リポジトリ操作エラー
    #[error("Repository error: {0}")]
    RepositoryError(String),

    /// 文書ストア操作エラー
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<EnvelopeRepositoryError> for ViewError {
    fn from(err: EnvelopeRepositoryError) -> Self {
        ViewError::RepositoryError(err.to_string())
    }
}

impl From<DocumentStoreError> for ViewError {
    fn from(err: DocumentStoreError) -> Self {
        ViewError::StorageError(err.to_string())
    }
}

/// 閲覧リクエスト
///
/// signer_idとaccess_tokenは署名者アクセスの場合のみ両方指定する。
/// どちらも省略した場合は送信者アクセスとして扱う。
#[derive(Debug, Clone, Deserialize)]
pub struct ViewRequest {
    pub tenant_id: String,
    pub envelope_id: String,
    pub signer_id: Option<String>,
    pub access_token: Option<String>,
}

/// 閲覧レスポンス
#[derive(Debug, Clone, Serialize)]
pub struct ViewResponse {
    pub envelope_id: String,
    pub status: EnvelopeStatus,
    /// 期限付きダウンロードURL
    pub url: String,
    pub expires_in_secs: u64,
}

/// 閲覧リクエストを処理するハンドラ
pub struct ViewDocumentHandler<R, D>
where
    R: EnvelopeRepository,
    D: DocumentStore,
{
    /// 封筒リポジトリ
    envelope_repo: R,
    /// 文書ストア
    documents: D,
    /// 署名付きURLの有効期間（秒）
    presign_expiry_secs: u64,
}

impl<R, D> ViewDocumentHandler<R, D>
where
    R: EnvelopeRepository,
    D: DocumentStore,
{
    /// 新しいViewDocumentHandlerを作成
    pub fn new(envelope_repo: R, documents: D, presign_expiry_secs: u64) -> Self {
        Self {
            envelope_repo,
            documents,
            presign_expiry_secs,
        }
    }

    /// 閲覧リクエストを処理
    ///
    /// # 処理フロー
    /// 1. 封筒を取得
    /// 2. 署名者アクセスならトークンと順番を検証（署名と同じ条件）
    /// 3. 閲覧対象のキーを決定（完了後の送信者は署名済みPDF）
    /// 4. 署名付きURLを発行
    ///
    /// 要件: 6.1, 7.2
    pub async fn handle(&self, request: ViewRequest, now: i64) -> Result<ViewResponse, ViewError> {
        let Some(envelope) = self
            .envelope_repo
            .get(&request.tenant_id, &request.envelope_id)
            .await?
        else {
            return Err(ViewError::NotFound(request.envelope_id));
        };

        let document_key = match (&request.signer_id, &request.access_token) {
            (Some(signer_id), Some(token)) => {
                // 署名者は自分の順番が進行中の間だけ元文書を閲覧できる
                SigningValidator::validate_view(&envelope, signer_id, token, now)
                    .map_err(|e| ViewError::AccessDenied(e.to_string()))?;
                envelope.document_key.clone()
            }
            (None, None) => {
                // 送信者は常に閲覧可能。完了後は署名済みPDFを返す
                match (&envelope.status, &envelope.completed_document_key) {
                    (EnvelopeStatus::Completed, Some(completed_key)) => completed_key.clone(),
                    _ => envelope.document_key.clone(),
                }
            }
            _ => {
                return Err(ViewError::AccessDenied(
                    "signer_id and access_token must be provided together".to_string(),
                ));
            }
        };

        let url = self
            .documents
            .presign_get(&document_key, Duration::from_secs(self.presign_expiry_secs))
            .await?;

        info!(
            tenant_id = %envelope.tenant_id,
            envelope_id = %envelope.id,
            document_key = %document_key,
            signer_access = request.signer_id.is_some(),
            "閲覧URLを発行"
        );

        Ok(ViewResponse {
            envelope_id: envelope.id,
            status: envelope.status,
            url,
            expires_in_secs: self.presign_expiry_secs,
        })
    }
}
