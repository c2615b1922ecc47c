/// 配信ログモジュール
///
/// EventBridgeの配信はat-least-onceのため、イベントと戦略の組ごとに
/// 配信記録を条件付き書き込みで先取りし、重複配信を抑止する。
use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::AttributeValue;
use thiserror::Error;
use tracing::debug;

/// 配信ログのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryLogError {
    /// DynamoDBリクエストに失敗
    #[error("delivery log request failed: {0}")]
    RequestFailed(String),
}

/// 配信記録の先取り結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// 記録を新規に書き込んだ（配信してよい）
    Claimed,
    /// 既に記録が存在する（配信済み）
    AlreadyDelivered,
}

/// 配信ログの抽象化
///
/// キーはイベントIDと戦略名の組。同じイベントが再配信されても
/// 2回目以降のclaimはAlreadyDeliveredになる。
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    /// 配信記録を先取りする
    async fn claim(
        &self,
        event_id: &str,
        strategy: &str,
        now: i64,
    ) -> Result<ClaimResult, DeliveryLogError>;

    /// 配信記録を取り消す
    ///
    /// 配信の実行に失敗した場合に呼び、再試行が配信し直せるようにする。
    async fn release(&self, event_id: &str, strategy: &str) -> Result<(), DeliveryLogError>;
}

/// DeliveryLogのDynamoDB実装
///
/// `attribute_not_exists`条件付きPutで重複を検出する。
/// expires_atはDynamoDBのTTL属性で、古い記録は自動削除される。
#[derive(Debug, Clone)]
pub struct DynamoDeliveryLog {
    /// DynamoDBクライアント
    client: DynamoDbClient,
    /// 配信ログテーブル名
    table_name: String,
    /// 記録の保持秒数
    ttl_secs: i64,
}

impl DynamoDeliveryLog {
    /// 新しいDynamoDeliveryLogを作成
    pub fn new(client: DynamoDbClient, table_name: String, ttl_secs: i64) -> Self {
        Self {
            client,
            table_name,
            ttl_secs,
        }
    }

    /// イベントIDと戦略名からログキーを構築
    fn log_key(event_id: &str, strategy: &str) -> String {
        format!("{event_id}#{strategy}")
    }
}

#[async_trait]
impl DeliveryLog for DynamoDeliveryLog {
    async fn claim(
        &self,
        event_id: &str,
        strategy: &str,
        now: i64,
    ) -> Result<ClaimResult, DeliveryLogError> {
        let key = Self::log_key(event_id, strategy);

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("pk", AttributeValue::S(key.clone()))
            .item("claimed_at", AttributeValue::N(now.to_string()))
            .item(
                "expires_at",
                AttributeValue::N((now + self.ttl_secs).to_string()),
            )
            .condition_expression("attribute_not_exists(pk)")
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(key = %key, "配信記録を書き込み");
                Ok(ClaimResult::Claimed)
            }
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    return Ok(ClaimResult::AlreadyDelivered);
                }
                Err(DeliveryLogError::RequestFailed(service_error.to_string()))
            }
        }
    }

    async fn release(&self, event_id: &str, strategy: &str) -> Result<(), DeliveryLogError> {
        let key = Self::log_key(event_id, strategy);

        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("pk", AttributeValue::S(key.clone()))
            .send()
            .await
            .map_err(|e| DeliveryLogError::RequestFailed(e.into_service_error().to_string()))?;

        debug!(key = %key, "配信記録を取り消し");
        Ok(())
    }
}
