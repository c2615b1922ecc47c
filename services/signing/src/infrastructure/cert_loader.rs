/// SSMパラメータストアからの署名証明書読み込み
///
/// 署名証明書はPEM形式でSecureStringパラメータに置かれている。
/// 復号して取得し、DERに変換して返す。
///
/// 要件: 3.5
use async_trait::async_trait;
use aws_sdk_ssm::Client as SsmClient;
use thiserror::Error;

use crate::domain::pkcs7;

/// 証明書読み込みのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CertLoaderError {
    /// SSM GetParameter呼び出しに失敗
    #[error("Parameter error: {0}")]
    ParameterError(String),

    /// パラメータに値が入っていない
    #[error("parameter {0} has no value")]
    EmptyParameter(String),

    /// PEMのデコードに失敗
    #[error("Certificate error: {0}")]
    CertificateError(String),
}

/// 署名証明書の取得元トレイト
///
/// 異なる実装を可能にします（実際のSSM、テスト用モック）。
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// 署名証明書をDER形式で取得する
    async fn load_certificate_der(&self) -> Result<Vec<u8>, CertLoaderError>;
}

/// CertificateSourceのSSM実装
#[derive(Debug, Clone)]
pub struct SsmCertLoader {
    /// SSMクライアント
    client: SsmClient,
    /// 証明書パラメータ名
    parameter_name: String,
}

impl SsmCertLoader {
    /// 新しいSsmCertLoaderを作成
    pub fn new(client: SsmClient, parameter_name: String) -> Self {
        Self {
            client,
            parameter_name,
        }
    }
}

#[async_trait]
impl CertificateSource for SsmCertLoader {
    async fn load_certificate_der(&self) -> Result<Vec<u8>, CertLoaderError> {
        let result = self
            .client
            .get_parameter()
            .name(&self.parameter_name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| CertLoaderError::ParameterError(e.into_service_error().to_string()))?;

        let pem = result
            .parameter()
            .and_then(|p| p.value())
            .ok_or_else(|| CertLoaderError::EmptyParameter(self.parameter_name.clone()))?;

        pkcs7::decode_pem_certificate(pem)
            .map_err(|e| CertLoaderError::CertificateError(e.to_string()))
    }
}
