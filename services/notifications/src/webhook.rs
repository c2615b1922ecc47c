/// Webhook配信モジュール
///
/// テナントが設定したエンドポイントへドメインイベントをJSONでPOSTする。
/// 指数バックオフによる再試行機能を持つ。
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// 最大再試行回数
const MAX_RETRIES: u32 = 3;

/// リクエストタイムアウト（秒）
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// 共有シークレットを渡すヘッダー名
const SECRET_HEADER: &str = "X-Webhook-Token";

/// Webhook配信のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WebhookError {
    /// 配信先URLが不正
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(String),

    /// ネットワークエラー（再試行してもなお失敗）
    #[error("webhook request failed: {0}")]
    NetworkError(String),

    /// HTTPエラーレスポンス
    #[error("webhook returned error: status={status}, message={message}")]
    HttpError {
        /// HTTPステータスコード
        status: u16,
        /// レスポンスボディ
        message: String,
    },
}

/// Webhookで配信するペイロード
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    /// EventBridgeが採番したイベントID
    pub event_id: String,
    /// イベントソース
    pub source: String,
    /// イベント種別
    pub detail_type: String,
    /// ドメインイベント本体
    pub detail: serde_json::Value,
}

/// Webhook配信の抽象化
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// ペイロードを配信する
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), WebhookError>;
}

/// WebhookSenderのHTTP実装
///
/// 指数バックオフで最大3回再試行する。配信先にはJSONボディと
/// 共有シークレットヘッダー（設定時のみ）を送る。
#[derive(Clone)]
pub struct HttpWebhookSender {
    /// HTTPクライアント（再試行ミドルウェア付き）
    client: ClientWithMiddleware,
    /// 配信先URL
    endpoint: Url,
    /// 共有シークレット
    secret: Option<String>,
}

impl std::fmt::Debug for HttpWebhookSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWebhookSender")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpWebhookSender {
    /// 新しいHttpWebhookSenderを作成
    ///
    /// # エラー
    /// URLが解析できない、またはhttp/https以外のスキームの場合はエラーを返す
    pub fn new(endpoint: &str, secret: Option<String>) -> Result<Self, WebhookError> {
        let endpoint = Url::parse(endpoint).map_err(|e| WebhookError::InvalidUrl(e.to_string()))?;
        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            return Err(WebhookError::InvalidUrl(format!(
                "unsupported scheme: {}",
                endpoint.scheme()
            )));
        }

        // 基本HTTPクライアントを作成
        let base_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| WebhookError::NetworkError(e.to_string()))?;

        // 指数バックオフ再試行ポリシー
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        // 再試行ミドルウェア付きクライアントを構築
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            endpoint,
            secret,
        })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        debug!(
            url = %self.endpoint,
            detail_type = %payload.detail_type,
            "Webhookを配信"
        );

        let mut request = self.client.post(self.endpoint.clone()).json(payload);
        if let Some(secret) = &self.secret {
            request = request.header(SECRET_HEADER, secret);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "Webhookリクエスト失敗");
            WebhookError::NetworkError(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            info!(
                detail_type = %payload.detail_type,
                status = %status,
                "Webhook配信に成功"
            );
            return Ok(());
        }

        // エラーレスポンスを処理
        let body = response.text().await.unwrap_or_default();
        warn!(
            status = %status,
            body = %body,
            detail_type = %payload.detail_type,
            "Webhook配信エラー"
        );

        Err(WebhookError::HttpError {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// WebhookSenderのテスト用モック
    ///
    /// 配信されたペイロードを記録し、失敗の注入をサポートする。
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockWebhookSender {
        delivered: Arc<Mutex<Vec<WebhookPayload>>>,
        next_error: Arc<Mutex<Option<WebhookError>>>,
    }

    impl MockWebhookSender {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// 配信済みペイロードのコピーを取得
        pub(crate) fn delivered_payloads(&self) -> Vec<WebhookPayload> {
            self.delivered.lock().unwrap().clone()
        }

        /// 次の配信を失敗させる
        pub(crate) fn set_next_error(&self, error: WebhookError) {
            *self.next_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl WebhookSender for MockWebhookSender {
        async fn deliver(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
            if let Some(error) = self.next_error.lock().unwrap().take() {
                return Err(error);
            }
            self.delivered.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    /// 正しいURLでクライアントを構築できる
    #[test]
    fn test_new_accepts_https_url() {
        let sender = HttpWebhookSender::new("https://hooks.example.com/esign", None).unwrap();
        assert_eq!(sender.endpoint.as_str(), "https://hooks.example.com/esign");
    }

    /// 解析できないURLは拒否される
    #[test]
    fn test_new_rejects_malformed_url() {
        let result = HttpWebhookSender::new("not a url", None);
        assert!(matches!(result, Err(WebhookError::InvalidUrl(_))));
    }

    /// http/https以外のスキームは拒否される
    #[test]
    fn test_new_rejects_unsupported_scheme() {
        let result = HttpWebhookSender::new("ftp://hooks.example.com/esign", None);
        match result {
            Err(WebhookError::InvalidUrl(msg)) => {
                assert!(msg.contains("unsupported scheme"));
            }
            other => panic!("Expected InvalidUrl, got {other:?}"),
        }
    }

    // エラー型の表示メッセージテスト
    #[test]
    fn test_webhook_error_display() {
        let error = WebhookError::HttpError {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "webhook returned error: status=500, message=boom"
        );
    }

    /// ペイロードはフラットなJSONにシリアライズされる
    #[test]
    fn test_payload_serialization() {
        let payload = WebhookPayload {
            event_id: "event-1".to_string(),
            source: "esign.signing".to_string(),
            detail_type: "envelope.completed".to_string(),
            detail: serde_json::json!({"envelope_id": "env-1"}),
        };

        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["event_id"], "event-1");
        assert_eq!(json["detail_type"], "envelope.completed");
        assert_eq!(json["detail"]["envelope_id"], "env-1");
    }
}
