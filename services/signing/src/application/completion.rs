/// 署名済みPDFの組み立て
///
/// 全署名者の署名が揃った封筒に対して、プレースホルダの書き込み、
/// バイトレンジのダイジェスト、KMS署名、PKCS#7コンテナの構築と
/// 埋め込み、S3へのアップロードまでを一続きに行う。
/// 要件: 3.1, 3.2, 3.3, 3.4, 3.5, 3.6, 3.7
use chrono::DateTime;
use thiserror::Error;
use tracing::info;

use crate::domain::Envelope;
use crate::domain::pdf::{self, PdfError, byte_range};
use crate::domain::pkcs7::{self, Pkcs7Error};
use crate::infrastructure::{
    CertLoaderError, CertificateSource, DocumentStore, DocumentStoreError, RemoteSigner,
    SignerError,
};

/// /Reasonに書く署名理由の固定文言
const SIGNING_REASON: &str = "All parties have signed";

/// 署名済みPDF生成のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompletionError {
    /// 文書の取得・保存に失敗
    #[error("document store error: {0}")]
    Document(#[from] DocumentStoreError),

    /// 署名証明書の取得に失敗
    #[error("certificate error: {0}")]
    Certificate(#[from] CertLoaderError),

    /// KMS署名に失敗
    #[error("signing error: {0}")]
    Signing(#[from] SignerError),

    /// PDF処理に失敗
    #[error("pdf error: {0}")]
    Pdf(#[from] PdfError),

    /// PKCS#7コンテナの構築に失敗
    #[error("pkcs7 error: {0}")]
    Pkcs7(#[from] Pkcs7Error),

    /// 署名時刻をUTC時刻に変換できない
    #[error("invalid signing timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// 完了文書のS3キー
fn completed_document_key(tenant_id: &str, envelope_id: &str) -> String {
    format!("tenants/{tenant_id}/envelopes/{envelope_id}/completed.pdf")
}

/// 署名済みPDFを生成してアップロードし、完了文書のキーを返す（要件 3.7）
///
/// # 処理フロー
/// 1. 元文書と署名証明書を取得
/// 2. 署名辞書のプレースホルダを増分更新として追記
/// 3. /ByteRangeを確定し、署名対象範囲のSHA-256を計算
/// 4. 署名属性のダイジェストをKMSで署名
/// 5. PKCS#7コンテナを組み立てて/Contentsの穴に埋め込み
/// 6. 完了文書としてアップロード
///
/// KMSが署名するのは文書のダイジェストではなく、それを包んだ
/// 署名属性（signedAttrs）のダイジェストである点に注意。
pub async fn seal_document<S, C, D>(
    signer: &S,
    certs: &C,
    documents: &D,
    envelope: &Envelope,
    now: i64,
) -> Result<String, CompletionError>
where
    S: RemoteSigner,
    C: CertificateSource,
    D: DocumentStore,
{
    let original = documents.get(&envelope.document_key).await?;
    let cert_der = certs.load_certificate_der().await?;

    let signing_time =
        DateTime::from_timestamp(now, 0).ok_or(CompletionError::InvalidTimestamp(now))?;

    let mut planted = pdf::plant(&original, &envelope.sender_email, SIGNING_REASON, signing_time)?;
    let ranges = byte_range::compute(
        planted.bytes.len(),
        planted.contents_start,
        planted.contents_end,
    );
    byte_range::finalize(&mut planted.bytes, &planted.byte_range_slot, &ranges)?;
    let document_digest = byte_range::digest(&planted.bytes, &ranges)?;

    let signed_attrs = pkcs7::signed_attributes(&document_digest, signing_time);
    let attrs_digest = pkcs7::attributes_digest(&signed_attrs);
    let signature = signer.sign_digest(&attrs_digest).await?;

    let container = pkcs7::build_signed_data(&cert_der, &signed_attrs, &signature)?;
    pdf::embed_signature(&mut planted, &container)?;

    let completed_key = completed_document_key(&envelope.tenant_id, &envelope.id);
    documents
        .put(&completed_key, planted.bytes, "application/pdf")
        .await?;

    info!(
        tenant_id = %envelope.tenant_id,
        envelope_id = %envelope.id,
        completed_key = %completed_key,
        container_len = container.len(),
        "署名済みPDFをアップロード"
    );

    Ok(completed_key)
}
