/// 署名サービス設定
///
/// 各Lambdaハンドラが必要とするテーブル名・バケット名・鍵IDなどを
/// 環境変数から読み込む。
///
/// 要件: 9.2
use thiserror::Error;

/// 設定読み込みのエラー型
#[derive(Debug, Error)]
pub enum SigningConfigError {
    #[error("environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("environment variable {0} has an invalid value")]
    InvalidEnvVar(String),
}

// デフォルト値
const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 900;
const DEFAULT_ENVELOPE_TTL_SECS: i64 = 14 * 24 * 60 * 60;

/// 署名サービス設定
///
/// 以下の環境変数から読み込む:
/// - ENVELOPES_TABLE: エンベロープ保存用DynamoDBテーブル名
/// - OUTBOX_TABLE: アウトボックスレコード用DynamoDBテーブル名
/// - DOCUMENTS_BUCKET: 文書保存用S3バケット名
/// - EVENT_BUS_NAME: ドメインイベント発行先EventBridgeバス名
/// - KMS_SIGNING_KEY_ID: 署名用KMS鍵ID
/// - SIGNING_CERT_PARAM: 署名証明書を格納したSSMパラメータ名
/// - PRESIGN_EXPIRY_SECS: 署名付きURLの有効秒数（省略時900）
/// - ENVELOPE_TTL_SECS: 送信からの既定有効秒数（省略時14日）
/// - OPS_TOPIC_ARN: 運用アラートSNSトピックARN（省略可）
#[derive(Debug, Clone)]
pub struct SigningConfig {
    envelopes_table: String,
    outbox_table: String,
    documents_bucket: String,
    event_bus_name: String,
    kms_signing_key_id: String,
    signing_cert_param: String,
    presign_expiry_secs: u64,
    envelope_ttl_secs: i64,
    ops_topic_arn: Option<String>,
}

impl SigningConfig {
    /// 環境変数から設定を読み込む
    ///
    /// # エラー
    /// 必須の環境変数が未設定、または数値変数が解析不能な場合はエラーを返す
    pub fn from_env() -> Result<Self, SigningConfigError> {
        let envelopes_table = require_env("ENVELOPES_TABLE")?;
        let outbox_table = require_env("OUTBOX_TABLE")?;
        let documents_bucket = require_env("DOCUMENTS_BUCKET")?;
        let event_bus_name = require_env("EVENT_BUS_NAME")?;
        let kms_signing_key_id = require_env("KMS_SIGNING_KEY_ID")?;
        let signing_cert_param = require_env("SIGNING_CERT_PARAM")?;

        let presign_expiry_secs =
            parse_env_or("PRESIGN_EXPIRY_SECS", DEFAULT_PRESIGN_EXPIRY_SECS)?;
        let envelope_ttl_secs = parse_env_or("ENVELOPE_TTL_SECS", DEFAULT_ENVELOPE_TTL_SECS)?;

        let ops_topic_arn = std::env::var("OPS_TOPIC_ARN").ok().filter(|s| !s.is_empty());

        Ok(Self {
            envelopes_table,
            outbox_table,
            documents_bucket,
            event_bus_name,
            kms_signing_key_id,
            signing_cert_param,
            presign_expiry_secs,
            envelope_ttl_secs,
            ops_topic_arn,
        })
    }

    /// 明示的な値で設定を作成（テスト用）
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        envelopes_table: String,
        outbox_table: String,
        documents_bucket: String,
        event_bus_name: String,
        kms_signing_key_id: String,
        signing_cert_param: String,
        presign_expiry_secs: u64,
        envelope_ttl_secs: i64,
        ops_topic_arn: Option<String>,
    ) -> Self {
        Self {
            envelopes_table,
            outbox_table,
            documents_bucket,
            event_bus_name,
            kms_signing_key_id,
            signing_cert_param,
            presign_expiry_secs,
            envelope_ttl_secs,
            ops_topic_arn,
        }
    }

    /// エンベロープテーブル名を取得
    pub fn envelopes_table(&self) -> &str {
        &self.envelopes_table
    }

    /// アウトボックステーブル名を取得
    pub fn outbox_table(&self) -> &str {
        &self.outbox_table
    }

    /// 文書バケット名を取得
    pub fn documents_bucket(&self) -> &str {
        &self.documents_bucket
    }

    /// イベントバス名を取得
    pub fn event_bus_name(&self) -> &str {
        &self.event_bus_name
    }

    /// KMS署名鍵IDを取得
    pub fn kms_signing_key_id(&self) -> &str {
        &self.kms_signing_key_id
    }

    /// 署名証明書のSSMパラメータ名を取得
    pub fn signing_cert_param(&self) -> &str {
        &self.signing_cert_param
    }

    /// 署名付きURLの有効秒数を取得
    pub fn presign_expiry_secs(&self) -> u64 {
        self.presign_expiry_secs
    }

    /// エンベロープの既定有効秒数を取得
    pub fn envelope_ttl_secs(&self) -> i64 {
        self.envelope_ttl_secs
    }

    /// 運用アラートトピックARNを取得（未設定ならNone）
    pub fn ops_topic_arn(&self) -> Option<&str> {
        self.ops_topic_arn.as_deref()
    }
}

fn require_env(name: &str) -> Result<String, SigningConfigError> {
    std::env::var(name).map_err(|_| SigningConfigError::MissingEnvVar(name.to_string()))
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, SigningConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| SigningConfigError::InvalidEnvVar(name.to_string())),
        Err(_) => Ok(default),
    }
}
