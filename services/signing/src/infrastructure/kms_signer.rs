/// KMSによるリモート署名
///
/// 秘密鍵はKMSの外に出さない。署名対象はSHA-256ダイジェストのみで、
/// 文書本体をKMSに送ることもない。
///
/// 要件: 3.4
use async_trait::async_trait;
use aws_sdk_kms::Client as KmsClient;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{MessageType, SigningAlgorithmSpec};
use thiserror::Error;
use tracing::{info, warn};

/// リモート署名のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignerError {
    /// KMS Sign呼び出しに失敗
    #[error("Signing error: {0}")]
    SigningError(String),

    /// KMSが署名を返さなかった
    #[error("KMS returned an empty signature")]
    EmptySignature,
}

/// ダイジェスト署名用トレイト
///
/// 異なる実装を可能にします（実際のKMS、テスト用モック）。
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// SHA-256ダイジェストにRSASSA-PKCS1-v1_5署名を付ける
    ///
    /// # 戻り値
    /// * `Ok(Vec<u8>)` - 署名バイト列（RSA-2048なら256バイト）
    /// * `Err(SignerError)` - 署名エラー
    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, SignerError>;
}

/// RemoteSignerのKMS実装
#[derive(Debug, Clone)]
pub struct KmsSigner {
    /// KMSクライアント
    client: KmsClient,
    /// 署名鍵のID（またはARN/エイリアス）
    key_id: String,
}

impl KmsSigner {
    /// 新しいKmsSignerを作成
    pub fn new(client: KmsClient, key_id: String) -> Self {
        Self { client, key_id }
    }
}

#[async_trait]
impl RemoteSigner for KmsSigner {
    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, SignerError> {
        info!(key_id = %self.key_id, "KMS署名開始");

        let result = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message(Blob::new(digest.to_vec()))
            .message_type(MessageType::Digest)
            .signing_algorithm(SigningAlgorithmSpec::RsassaPkcs1V15Sha256)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                warn!(key_id = %self.key_id, error = %service_error, "KMS署名エラー");
                SignerError::SigningError(service_error.to_string())
            })?;

        let signature = result.signature().ok_or(SignerError::EmptySignature)?;
        Ok(signature.as_ref().to_vec())
    }
}
