/// 通知サービス設定
///
/// 配信ログテーブル名・送信元アドレス・リンク先URLなどを
/// 環境変数から読み込む。
use thiserror::Error;

/// 設定読み込みのエラー型
#[derive(Debug, Error)]
pub enum NotificationsConfigError {
    #[error("environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("environment variable {0} has an invalid value")]
    InvalidEnvVar(String),
}

// デフォルト値
const DEFAULT_DELIVERY_LOG_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// 通知サービス設定
///
/// 以下の環境変数から読み込む:
/// - DELIVERY_LOG_TABLE: 配信ログ用DynamoDBテーブル名
/// - SENDER_ADDRESS: 通知メールの送信元アドレス
/// - SIGNING_BASE_URL: 署名ページのベースURL（署名リンクに使用）
/// - VIEW_BASE_URL: 文書閲覧エンドポイントのベースURL（完了メールに使用）
/// - WEBHOOK_URL: テナント向けWebhook配信先URL（省略時は配信しない）
/// - WEBHOOK_SECRET: Webhookリクエストに付与する共有シークレット（省略可）
/// - DELIVERY_LOG_TTL_SECS: 配信ログの保持秒数（省略時30日）
#[derive(Debug, Clone)]
pub struct NotificationsConfig {
    delivery_log_table: String,
    sender_address: String,
    signing_base_url: String,
    view_base_url: String,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
    delivery_log_ttl_secs: i64,
}

impl NotificationsConfig {
    /// 環境変数から設定を読み込む
    ///
    /// # エラー
    /// 必須の環境変数が未設定、または数値変数が解析不能な場合はエラーを返す
    pub fn from_env() -> Result<Self, NotificationsConfigError> {
        let delivery_log_table = require_env("DELIVERY_LOG_TABLE")?;
        let sender_address = require_env("SENDER_ADDRESS")?;
        let signing_base_url = require_env("SIGNING_BASE_URL")?;
        let view_base_url = require_env("VIEW_BASE_URL")?;

        let webhook_url = std::env::var("WEBHOOK_URL").ok().filter(|s| !s.is_empty());
        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let delivery_log_ttl_secs =
            parse_env_or("DELIVERY_LOG_TTL_SECS", DEFAULT_DELIVERY_LOG_TTL_SECS)?;

        Ok(Self {
            delivery_log_table,
            sender_address,
            signing_base_url,
            view_base_url,
            webhook_url,
            webhook_secret,
            delivery_log_ttl_secs,
        })
    }

    /// 配信ログテーブル名を取得
    pub fn delivery_log_table(&self) -> &str {
        &self.delivery_log_table
    }

    /// 送信元アドレスを取得
    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    /// 署名ページのベースURLを取得
    pub fn signing_base_url(&self) -> &str {
        &self.signing_base_url
    }

    /// 閲覧エンドポイントのベースURLを取得
    pub fn view_base_url(&self) -> &str {
        &self.view_base_url
    }

    /// Webhook配信先URLを取得（未設定ならNone）
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    /// Webhook共有シークレットを取得（未設定ならNone）
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    /// 配信ログの保持秒数を取得
    pub fn delivery_log_ttl_secs(&self) -> i64 {
        self.delivery_log_ttl_secs
    }
}

fn require_env(name: &str) -> Result<String, NotificationsConfigError> {
    std::env::var(name).map_err(|_| NotificationsConfigError::MissingEnvVar(name.to_string()))
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, NotificationsConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| NotificationsConfigError::InvalidEnvVar(name.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // テストで環境変数を安全に設定/削除するヘルパー
    // 安全性: #[serial]でシリアル実行するため環境変数の競合は起きない
    unsafe fn set_env(key: &str, value: &str) {
        // 安全性: 呼び出し元が安全であることを保証（シリアル実行）
        unsafe { std::env::set_var(key, value) };
    }

    unsafe fn remove_env(key: &str) {
        // 安全性: 呼び出し元が安全であることを保証（シリアル実行）
        unsafe { std::env::remove_var(key) };
    }

    const ALL_VARS: &[&str] = &[
        "DELIVERY_LOG_TABLE",
        "SENDER_ADDRESS",
        "SIGNING_BASE_URL",
        "VIEW_BASE_URL",
        "WEBHOOK_URL",
        "WEBHOOK_SECRET",
        "DELIVERY_LOG_TTL_SECS",
    ];

    // 安全性: テスト環境のクリーンアップ
    unsafe fn cleanup() {
        for var in ALL_VARS {
            unsafe { remove_env(var) };
        }
    }

    unsafe fn set_required() {
        unsafe {
            set_env("DELIVERY_LOG_TABLE", "test-delivery-log");
            set_env("SENDER_ADDRESS", "noreply@example.com");
            set_env("SIGNING_BASE_URL", "https://sign.example.com/sign");
            set_env("VIEW_BASE_URL", "https://sign.example.com/view");
        }
    }

    // エラー型の表示メッセージテスト
    #[test]
    fn test_missing_env_var_error_display() {
        let error = NotificationsConfigError::MissingEnvVar("DELIVERY_LOG_TABLE".to_string());
        assert_eq!(
            error.to_string(),
            "environment variable not set: DELIVERY_LOG_TABLE"
        );
    }

    /// 必須変数が揃っていればデフォルト値込みで読み込める
    #[test]
    #[serial]
    fn test_from_env_with_defaults() {
        // 安全性: シリアル実行
        unsafe {
            cleanup();
            set_required();
        }

        let config = NotificationsConfig::from_env().unwrap();

        assert_eq!(config.delivery_log_table(), "test-delivery-log");
        assert_eq!(config.sender_address(), "noreply@example.com");
        assert_eq!(config.signing_base_url(), "https://sign.example.com/sign");
        assert_eq!(config.view_base_url(), "https://sign.example.com/view");
        assert_eq!(config.webhook_url(), None);
        assert_eq!(config.webhook_secret(), None);
        assert_eq!(config.delivery_log_ttl_secs(), DEFAULT_DELIVERY_LOG_TTL_SECS);

        // 安全性: シリアル実行
        unsafe { cleanup() };
    }

    /// 任意変数を設定すれば上書きされる
    #[test]
    #[serial]
    fn test_from_env_with_overrides() {
        // 安全性: シリアル実行
        unsafe {
            cleanup();
            set_required();
            set_env("WEBHOOK_URL", "https://hooks.example.com/esign");
            set_env("WEBHOOK_SECRET", "shared-secret");
            set_env("DELIVERY_LOG_TTL_SECS", "3600");
        }

        let config = NotificationsConfig::from_env().unwrap();

        assert_eq!(
            config.webhook_url(),
            Some("https://hooks.example.com/esign")
        );
        assert_eq!(config.webhook_secret(), Some("shared-secret"));
        assert_eq!(config.delivery_log_ttl_secs(), 3600);

        // 安全性: シリアル実行
        unsafe { cleanup() };
    }

    /// 必須変数の欠損はエラーになる
    #[test]
    #[serial]
    fn test_from_env_missing_required() {
        // 安全性: シリアル実行
        unsafe {
            cleanup();
            set_required();
            remove_env("SENDER_ADDRESS");
        }

        let result = NotificationsConfig::from_env();

        match result {
            Err(NotificationsConfigError::MissingEnvVar(name)) => {
                assert_eq!(name, "SENDER_ADDRESS");
            }
            other => panic!("Expected MissingEnvVar, got {other:?}"),
        }

        // 安全性: シリアル実行
        unsafe { cleanup() };
    }

    /// 数値変数の解析失敗はエラーになる
    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        // 安全性: シリアル実行
        unsafe {
            cleanup();
            set_required();
            set_env("DELIVERY_LOG_TTL_SECS", "not-a-number");
        }

        let result = NotificationsConfig::from_env();

        match result {
            Err(NotificationsConfigError::InvalidEnvVar(name)) => {
                assert_eq!(name, "DELIVERY_LOG_TTL_SECS");
            }
            other => panic!("Expected InvalidEnvVar, got {other:?}"),
        }

        // 安全性: シリアル実行
        unsafe { cleanup() };
    }

    /// 空文字列のWEBHOOK_URLは未設定として扱う
    #[test]
    #[serial]
    fn test_from_env_empty_webhook_url_is_none() {
        // 安全性: シリアル実行
        unsafe {
            cleanup();
            set_required();
            set_env("WEBHOOK_URL", "");
        }

        let config = NotificationsConfig::from_env().unwrap();

        assert_eq!(config.webhook_url(), None);

        // 安全性: シリアル実行
        unsafe { cleanup() };
    }
}
