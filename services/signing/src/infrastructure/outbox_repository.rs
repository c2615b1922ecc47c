/// アウトボックスレコードの発行状態を管理するリポジトリ
///
/// レコード本体はエンベロープ更新と同一トランザクションで書き込まれる
/// （envelope_repository参照）。このモジュールは発行済みマークと、
/// 発行漏れレコードの再検出を担当する。
///
/// 要件: 4.3, 4.5
use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::AttributeValue;
use thiserror::Error;

use crate::domain::{OutboxRecord, OutboxStatus};

/// アウトボックスリポジトリ操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OutboxRepositoryError {
    /// DynamoDBへの書き込みに失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// DynamoDBからの読み取りに失敗
    #[error("Read error: {0}")]
    ReadError(String),
}

/// 発行済みマークの結果
#[derive(Debug, Clone, PartialEq)]
pub enum MarkResult {
    /// 発行済みにマークした
    Marked,
    /// 既に発行済みだった（別の実行が先にマークした）
    AlreadyPublished,
}

/// アウトボックス状態管理用トレイト
///
/// 要件: 4.3, 4.5
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// レコードを発行済みにマークする
    ///
    /// pendingのレコードのみマークできる。既に発行済みの場合や
    /// レコードが存在しない場合は`AlreadyPublished`を返す（冪等）。
    /// 要件: 4.3
    async fn mark_published(
        &self,
        record_id: &str,
        published_at: i64,
    ) -> Result<MarkResult, OutboxRepositoryError>;

    /// 発行漏れの古いpendingレコードを検索する
    ///
    /// `created_at <= older_than`のpendingレコードを古い順に返す。
    /// 要件: 4.5
    async fn scan_stale(
        &self,
        older_than: i64,
        limit: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxRepositoryError>;
}

/// OutboxRepositoryのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoOutboxRepository {
    /// DynamoDBクライアント
    client: DynamoDbClient,
    /// アウトボックステーブル名
    table_name: String,
}

impl DynamoOutboxRepository {
    /// 新しいDynamoOutboxRepositoryを作成
    pub fn new(client: DynamoDbClient, table_name: String) -> Self {
        Self { client, table_name }
    }

    /// アイテムからアウトボックスレコードを復元する
    fn record_from_item(item: &HashMap<String, AttributeValue>) -> Option<OutboxRecord> {
        let get_s = |key: &str| item.get(key).and_then(|v| v.as_s().ok()).cloned();
        let get_n = |key: &str| {
            item.get(key)
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse::<i64>().ok())
        };

        let status = match get_s("status")?.as_str() {
            "pending" => OutboxStatus::Pending,
            "published" => OutboxStatus::Published,
            _ => return None,
        };

        Some(OutboxRecord {
            id: get_s("id")?,
            tenant_id: get_s("tenant_id")?,
            envelope_id: get_s("envelope_id")?,
            source: get_s("source")?,
            detail_type: get_s("detail_type")?,
            event_json: get_s("event_json")?,
            status,
            created_at: get_n("created_at")?,
            published_at: get_n("published_at"),
        })
    }
}

#[async_trait]
impl OutboxRepository for DynamoOutboxRepository {
    async fn mark_published(
        &self,
        record_id: &str,
        published_at: i64,
    ) -> Result<MarkResult, OutboxRepositoryError> {
        // "status"はDynamoDBの予約語なので#sで参照する
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(record_id.to_string()))
            .update_expression("SET #s = :published, published_at = :at")
            .condition_expression("#s = :pending")
            .expression_attribute_names("#s", "status")
            .expression_attribute_values(
                ":published",
                AttributeValue::S(OutboxStatus::Published.as_str().to_string()),
            )
            .expression_attribute_values(
                ":pending",
                AttributeValue::S(OutboxStatus::Pending.as_str().to_string()),
            )
            .expression_attribute_values(":at", AttributeValue::N(published_at.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(MarkResult::Marked),
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    return Ok(MarkResult::AlreadyPublished);
                }
                Err(OutboxRepositoryError::WriteError(service_error.to_string()))
            }
        }
    }

    async fn scan_stale(
        &self,
        older_than: i64,
        limit: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxRepositoryError> {
        let mut records = Vec::new();
        let mut last_evaluated_key = None;

        // ページネーション: LastEvaluatedKeyがある限りスキャンを続ける
        loop {
            let mut scan_builder = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("#s = :pending AND created_at <= :cutoff")
                .expression_attribute_names("#s", "status")
                .expression_attribute_values(
                    ":pending",
                    AttributeValue::S(OutboxStatus::Pending.as_str().to_string()),
                )
                .expression_attribute_values(":cutoff", AttributeValue::N(older_than.to_string()));

            // 前回のスキャンの続きから開始
            if let Some(key) = last_evaluated_key.take() {
                scan_builder = scan_builder.set_exclusive_start_key(Some(key));
            }

            let result = scan_builder.send().await.map_err(|e| {
                OutboxRepositoryError::ReadError(e.into_service_error().to_string())
            })?;

            if let Some(items) = result.items {
                for item in items {
                    // 壊れたアイテムは再発行を止めずにスキップする
                    if let Some(record) = Self::record_from_item(&item) {
                        records.push(record);
                    }
                }
            }

            match result.last_evaluated_key {
                Some(key) => last_evaluated_key = Some(key),
                None => break,
            }
        }

        // 古い順に整列してlimitを適用
        records.sort_by_key(|r| r.created_at);
        records.truncate(limit as usize);

        Ok(records)
    }
}
