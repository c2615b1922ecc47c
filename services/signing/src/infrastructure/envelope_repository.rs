/// DynamoDBでエンベロープを管理するリポジトリ
///
/// エンベロープ集約はJSONシリアライズして1アイテムに保存し、
/// 状態遷移イベントは同一トランザクションでアウトボックステーブルに
/// 書き込む。
///
/// 要件: 1.1, 1.2, 4.1, 7.1
use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem};
use thiserror::Error;

use crate::domain::{Envelope, EnvelopeStatus, OutboxRecord};

/// エンベロープリポジトリ操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeRepositoryError {
    /// DynamoDBへの書き込みに失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// DynamoDBからの読み取りに失敗
    #[error("Read error: {0}")]
    ReadError(String),

    /// データのシリアライズ/デシリアライズに失敗
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// エンベロープ作成結果
#[derive(Debug, Clone, PartialEq)]
pub enum CreateResult {
    /// 新規に作成された
    Created,
    /// 同じIDのエンベロープが既に存在
    AlreadyExists,
}

/// エンベロープ更新結果
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResult {
    /// 更新された
    Updated,
    /// 期待したステータスと一致しなかった（並行更新）
    Conflict,
}

/// エンベロープ永続化用トレイト
///
/// 異なる実装を可能にします（実際のDynamoDB、テスト用モック）。
/// 要件: 1.1, 4.1
#[async_trait]
pub trait EnvelopeRepository: Send + Sync {
    /// テナントIDとエンベロープIDで取得
    ///
    /// # 戻り値
    /// * 見つかった場合は`Ok(Some(Envelope))`
    /// * 見つからなかった場合は`Ok(None)`
    async fn get(
        &self,
        tenant_id: &str,
        envelope_id: &str,
    ) -> Result<Option<Envelope>, EnvelopeRepositoryError>;

    /// エンベロープとアウトボックスレコードを原子的に作成
    ///
    /// 同じ分割キーが既に存在する場合は`AlreadyExists`を返し、
    /// アウトボックスレコードも書き込まない。
    /// 要件: 1.1, 4.1
    async fn create_with_outbox(
        &self,
        envelope: &Envelope,
        records: &[OutboxRecord],
    ) -> Result<CreateResult, EnvelopeRepositoryError>;

    /// エンベロープとアウトボックスレコードを原子的に更新
    ///
    /// 保存中のステータスが`expected_status`と一致しない場合は
    /// `Conflict`を返し、何も書き込まない（楽観ロック）。
    /// 要件: 1.2, 4.1
    async fn update_with_outbox(
        &self,
        envelope: &Envelope,
        expected_status: EnvelopeStatus,
        records: &[OutboxRecord],
    ) -> Result<UpdateResult, EnvelopeRepositoryError>;

    /// 期限切れ対象のエンベロープを検索
    ///
    /// 送信中（sent）かつ`expires_at <= now`のエンベロープを返す。
    /// 要件: 1.7
    async fn query_expiring(
        &self,
        now: i64,
        limit: u32,
    ) -> Result<Vec<Envelope>, EnvelopeRepositoryError>;
}

/// EnvelopeRepositoryのDynamoDB実装
///
/// エンベロープテーブルのアイテム構成:
/// - pk: "TENANT#{tenant_id}#ENV#{envelope_id}"（分割キー）
/// - tenant_id / envelope_id: 個別属性
/// - status_key: ステータス文字列（GSI-StatusExpiryのハッシュキー）
/// - expires_at: 期限エポック秒（GSI-StatusExpiryのレンジキー、送信後のみ）
/// - envelope_json: 集約全体のJSON
#[derive(Debug, Clone)]
pub struct DynamoEnvelopeRepository {
    /// DynamoDBクライアント
    client: DynamoDbClient,
    /// エンベロープテーブル名
    envelopes_table: String,
    /// アウトボックステーブル名
    outbox_table: String,
}

impl DynamoEnvelopeRepository {
    /// 新しいDynamoEnvelopeRepositoryを作成
    pub fn new(client: DynamoDbClient, envelopes_table: String, outbox_table: String) -> Self {
        Self {
            client,
            envelopes_table,
            outbox_table,
        }
    }

    /// エンベロープを完全なJSONにシリアライズ
    fn serialize_envelope(envelope: &Envelope) -> Result<String, EnvelopeRepositoryError> {
        serde_json::to_string(envelope)
            .map_err(|e| EnvelopeRepositoryError::SerializationError(e.to_string()))
    }

    /// JSONからエンベロープをデシリアライズ
    fn deserialize_envelope(json: &str) -> Result<Envelope, EnvelopeRepositoryError> {
        serde_json::from_str(json)
            .map_err(|e| EnvelopeRepositoryError::SerializationError(e.to_string()))
    }

    /// エンベロープ保存用の属性マップを構築
    fn build_envelope_item(
        envelope: &Envelope,
    ) -> Result<HashMap<String, AttributeValue>, EnvelopeRepositoryError> {
        let envelope_json = Self::serialize_envelope(envelope)?;

        let mut item = HashMap::new();
        item.insert(
            "pk".to_string(),
            AttributeValue::S(envelope.partition_key()),
        );
        item.insert(
            "tenant_id".to_string(),
            AttributeValue::S(envelope.tenant_id.clone()),
        );
        item.insert(
            "envelope_id".to_string(),
            AttributeValue::S(envelope.id.clone()),
        );
        item.insert(
            "status_key".to_string(),
            AttributeValue::S(envelope.status.as_str().to_string()),
        );
        item.insert(
            "updated_at".to_string(),
            AttributeValue::N(envelope.updated_at.to_string()),
        );
        item.insert("envelope_json".to_string(), AttributeValue::S(envelope_json));

        // GSI-StatusExpiryはスパースインデックス。期限を持つものだけ載せる
        if let Some(expires_at) = envelope.expires_at {
            item.insert(
                "expires_at".to_string(),
                AttributeValue::N(expires_at.to_string()),
            );
        }

        Ok(item)
    }

    /// アウトボックスレコード保存用の属性マップを構築
    fn build_outbox_item(record: &OutboxRecord) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(record.id.clone()));
        item.insert(
            "tenant_id".to_string(),
            AttributeValue::S(record.tenant_id.clone()),
        );
        item.insert(
            "envelope_id".to_string(),
            AttributeValue::S(record.envelope_id.clone()),
        );
        item.insert("source".to_string(), AttributeValue::S(record.source.clone()));
        item.insert(
            "detail_type".to_string(),
            AttributeValue::S(record.detail_type.clone()),
        );
        item.insert(
            "event_json".to_string(),
            AttributeValue::S(record.event_json.clone()),
        );
        item.insert(
            "status".to_string(),
            AttributeValue::S(record.status.as_str().to_string()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::N(record.created_at.to_string()),
        );
        item
    }

    /// アウトボックスレコード用のPutを構築
    fn build_outbox_put(&self, record: &OutboxRecord) -> Result<Put, EnvelopeRepositoryError> {
        Put::builder()
            .table_name(&self.outbox_table)
            .set_item(Some(Self::build_outbox_item(record)))
            .condition_expression("attribute_not_exists(id)")
            .build()
            .map_err(|e| EnvelopeRepositoryError::WriteError(e.to_string()))
    }
}

#[async_trait]
impl EnvelopeRepository for DynamoEnvelopeRepository {
    async fn get(
        &self,
        tenant_id: &str,
        envelope_id: &str,
    ) -> Result<Option<Envelope>, EnvelopeRepositoryError> {
        let pk = Envelope::partition_key_for(tenant_id, envelope_id);

        let result = self
            .client
            .get_item()
            .table_name(&self.envelopes_table)
            .key("pk", AttributeValue::S(pk))
            .send()
            .await
            .map_err(|e| EnvelopeRepositoryError::ReadError(e.into_service_error().to_string()))?;

        match result.item {
            Some(item) => {
                let json = item
                    .get("envelope_json")
                    .and_then(|v| v.as_s().ok())
                    .ok_or_else(|| {
                        EnvelopeRepositoryError::SerializationError(
                            "Missing envelope_json field".to_string(),
                        )
                    })?;
                Ok(Some(Self::deserialize_envelope(json)?))
            }
            None => Ok(None),
        }
    }

    async fn create_with_outbox(
        &self,
        envelope: &Envelope,
        records: &[OutboxRecord],
    ) -> Result<CreateResult, EnvelopeRepositoryError> {
        let item = Self::build_envelope_item(envelope)?;

        // アウトボックスが空なら単独のput_itemで足りる
        if records.is_empty() {
            let result = self
                .client
                .put_item()
                .table_name(&self.envelopes_table)
                .set_item(Some(item))
                .condition_expression("attribute_not_exists(pk)")
                .send()
                .await;

            return match result {
                Ok(_) => Ok(CreateResult::Created),
                Err(err) => {
                    let service_error = err.into_service_error();
                    if service_error.is_conditional_check_failed_exception() {
                        return Ok(CreateResult::AlreadyExists);
                    }
                    Err(EnvelopeRepositoryError::WriteError(
                        service_error.to_string(),
                    ))
                }
            };
        }

        let envelope_put = Put::builder()
            .table_name(&self.envelopes_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(pk)")
            .build()
            .map_err(|e| EnvelopeRepositoryError::WriteError(e.to_string()))?;

        let mut request = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(envelope_put).build());

        for record in records {
            let put = self.build_outbox_put(record)?;
            request = request.transact_items(TransactWriteItem::builder().put(put).build());
        }

        let result = request.send().await;

        match result {
            Ok(_) => Ok(CreateResult::Created),
            Err(err) => {
                let service_error = err.into_service_error();
                // TransactionCanceledExceptionの中にConditionalCheckFailedが含まれているか確認
                if service_error.to_string().contains("ConditionalCheckFailed") {
                    return Ok(CreateResult::AlreadyExists);
                }
                Err(EnvelopeRepositoryError::WriteError(
                    service_error.to_string(),
                ))
            }
        }
    }

    async fn update_with_outbox(
        &self,
        envelope: &Envelope,
        expected_status: EnvelopeStatus,
        records: &[OutboxRecord],
    ) -> Result<UpdateResult, EnvelopeRepositoryError> {
        let item = Self::build_envelope_item(envelope)?;

        // 保存中のステータス一致を条件にした全置換put（楽観ロック）
        let envelope_put = Put::builder()
            .table_name(&self.envelopes_table)
            .set_item(Some(item))
            .condition_expression("status_key = :expected")
            .expression_attribute_values(
                ":expected",
                AttributeValue::S(expected_status.as_str().to_string()),
            )
            .build()
            .map_err(|e| EnvelopeRepositoryError::WriteError(e.to_string()))?;

        let mut request = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(envelope_put).build());

        for record in records {
            let put = self.build_outbox_put(record)?;
            request = request.transact_items(TransactWriteItem::builder().put(put).build());
        }

        let result = request.send().await;

        match result {
            Ok(_) => Ok(UpdateResult::Updated),
            Err(err) => {
                let service_error = err.into_service_error();
                // TransactionCanceledExceptionの中にConditionalCheckFailedが含まれているか確認
                if service_error.to_string().contains("ConditionalCheckFailed") {
                    return Ok(UpdateResult::Conflict);
                }
                Err(EnvelopeRepositoryError::WriteError(
                    service_error.to_string(),
                ))
            }
        }
    }

    async fn query_expiring(
        &self,
        now: i64,
        limit: u32,
    ) -> Result<Vec<Envelope>, EnvelopeRepositoryError> {
        let result = self
            .client
            .query()
            .table_name(&self.envelopes_table)
            .index_name("GSI-StatusExpiry")
            .key_condition_expression("status_key = :s AND expires_at <= :now")
            .expression_attribute_values(
                ":s",
                AttributeValue::S(EnvelopeStatus::Sent.as_str().to_string()),
            )
            .expression_attribute_values(":now", AttributeValue::N(now.to_string()))
            .limit(limit as i32)
            .scan_index_forward(true) // 期限の古い順
            .send()
            .await
            .map_err(|e| EnvelopeRepositoryError::ReadError(e.into_service_error().to_string()))?;

        let mut envelopes = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                // 壊れたアイテムはスイープを止めずにスキップする
                if let Some(json) = item.get("envelope_json").and_then(|v| v.as_s().ok())
                    && let Ok(envelope) = Self::deserialize_envelope(json)
                {
                    envelopes.push(envelope);
                }
            }
        }

        Ok(envelopes)
    }
}
