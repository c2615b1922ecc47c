/// アウトボックス中継ハンドラ
///
/// DynamoDB Streamsで届いたアウトボックスレコードをEventBridgeに
/// 発行し、発行済みマークを付ける。発行は少なくとも1回の保証で、
/// 重複発行は下流のコンシューマが配信ログで吸収する。
/// 要件: 4.2, 4.3, 4.4, 4.5
use aws_lambda_events::event::dynamodb::{Event, EventRecord};
use serde_dynamo::AttributeValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{OutboxRecord, OutboxStatus};
use crate::infrastructure::{
    EventBus, OutboundEvent, OutboxRepository, OutboxRepositoryError, PublishOutcome,
};

/// ストリームレコード抽出のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelayExtractError {
    /// 必須フィールドが欠損または型不一致
    #[error("フィールドが欠損しています: {0}")]
    MissingField(String),

    /// statusが既知の値ではない
    #[error("未知のstatus値: {0}")]
    UnknownStatus(String),
}

/// 中継処理の結果
///
/// ストリームバッチ処理の発行/スキップ/失敗件数を保持
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResult {
    /// 発行して発行済みマークまで終えたレコード数
    pub published_count: usize,
    /// 中継対象外としてスキップしたレコード数
    pub skipped_count: usize,
    /// 発行またはマークに失敗したレコード数
    pub failed_count: usize,
}

impl RelayResult {
    /// 新しいRelayResultを作成
    pub fn new() -> Self {
        Self {
            published_count: 0,
            skipped_count: 0,
            failed_count: 0,
        }
    }
}

impl Default for RelayResult {
    fn default() -> Self {
        Self::new()
    }
}

/// アウトボックスレコードをイベントバスへ中継するハンドラ
///
/// # 要件
/// - 4.2: pendingレコードをEventBridgeに発行
/// - 4.3: 発行に成功したレコードにpublishedマークを付ける
/// - 4.5: 発行漏れレコードの再発行（redrive）
pub struct OutboxRelayHandler<B, O>
where
    B: EventBus,
    O: OutboxRepository,
{
    /// イベントバス
    event_bus: B,
    /// アウトボックスリポジトリ
    outbox_repo: O,
}

impl<B, O> OutboxRelayHandler<B, O>
where
    B: EventBus,
    O: OutboxRepository,
{
    /// 新しいOutboxRelayHandlerを作成
    pub fn new(event_bus: B, outbox_repo: O) -> Self {
        Self {
            event_bus,
            outbox_repo,
        }
    }

    /// DynamoDB Streamsイベントを処理
    ///
    /// バッチ内の1件の失敗が他のレコードを止めないよう、エラーは
    /// 件数として返しバッチ全体は常に成功扱いにする。失敗した
    /// レコードはpendingのまま残り、redriveで再発行される。
    ///
    /// # Returns
    /// * `RelayResult` - 処理結果（発行/スキップ/失敗件数）
    pub async fn process_event(&self, event: Event, now: i64) -> RelayResult {
        let record_count = event.records.len();
        info!(record_count = record_count, "アウトボックスストリーム処理開始");

        let mut result = RelayResult::new();
        let mut pending = Vec::new();

        for record in &event.records {
            match Self::extract_pending(record) {
                Ok(Some(outbox_record)) => pending.push(outbox_record),
                Ok(None) => {
                    result.skipped_count += 1;
                }
                Err(e) => {
                    warn!(error = %e, "レコードの抽出に失敗");
                    result.failed_count += 1;
                }
            }
        }

        self.publish_and_mark(pending, now, &mut result).await;

        info!(
            published_count = result.published_count,
            skipped_count = result.skipped_count,
            failed_count = result.failed_count,
            "アウトボックス中継完了"
        );

        result
    }

    /// 発行漏れレコードを再発行する（要件 4.5）
    ///
    /// ストリーム処理が失敗したまま残ったpendingレコードを
    /// 走査して発行し直す。スケジュールまたは手動で起動される。
    pub async fn redrive(
        &self,
        older_than: i64,
        limit: u32,
        now: i64,
    ) -> Result<RelayResult, OutboxRepositoryError> {
        let stale = self.outbox_repo.scan_stale(older_than, limit).await?;
        info!(stale_count = stale.len(), "発行漏れレコードを取得");

        let mut result = RelayResult::new();
        self.publish_and_mark(stale, now, &mut result).await;

        info!(
            published_count = result.published_count,
            failed_count = result.failed_count,
            "再発行完了"
        );

        Ok(result)
    }

    /// レコード群を発行し、受理されたものに発行済みマークを付ける
    async fn publish_and_mark(
        &self,
        pending: Vec<OutboxRecord>,
        now: i64,
        result: &mut RelayResult,
    ) {
        if pending.is_empty() {
            return;
        }

        let events: Vec<OutboundEvent> = pending
            .iter()
            .map(|record| OutboundEvent {
                source: record.source.clone(),
                detail_type: record.detail_type.clone(),
                detail_json: record.event_json.clone(),
            })
            .collect();

        let outcomes = match self.event_bus.publish(&events).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(
                    error = %e,
                    event_count = events.len(),
                    "イベントバスへの発行に失敗"
                );
                result.failed_count += pending.len();
                return;
            }
        };

        for (record, outcome) in pending.iter().zip(outcomes) {
            match outcome {
                PublishOutcome::Accepted => {
                    match self.outbox_repo.mark_published(&record.id, now).await {
                        Ok(_) => {
                            debug!(record_id = %record.id, "発行済みマークを付与");
                            result.published_count += 1;
                        }
                        Err(e) => {
                            // マークに失敗したレコードは再試行で再発行される
                            warn!(
                                record_id = %record.id,
                                error = %e,
                                "発行済みマークに失敗"
                            );
                            result.failed_count += 1;
                        }
                    }
                }
                PublishOutcome::Rejected(reason) => {
                    warn!(
                        record_id = %record.id,
                        detail_type = %record.detail_type,
                        reason = %reason,
                        "イベントバスが発行を拒否"
                    );
                    result.failed_count += 1;
                }
            }
        }
    }

    /// ストリームレコードから中継対象のアウトボックスレコードを抽出
    ///
    /// 中継対象はINSERTかつstatusがpendingのレコードのみ。
    /// MODIFY（発行済みマーク）とREMOVE（TTL削除）は対象外。
    fn extract_pending(record: &EventRecord) -> Result<Option<OutboxRecord>, RelayExtractError> {
        if record.event_name.as_str() != "INSERT" {
            return Ok(None);
        }

        let new_image = &record.change.new_image;
        if new_image.is_empty() {
            return Err(RelayExtractError::MissingField(
                "NewImageがありません".to_string(),
            ));
        }

        let outbox_record = Self::record_from_image(new_image)?;
        if outbox_record.status != OutboxStatus::Pending {
            // ストリームの再配信等で発行済みレコードが届いた場合
            return Ok(None);
        }

        Ok(Some(outbox_record))
    }

    /// DynamoDB Itemからアウトボックスレコードを復元
    fn record_from_image(image: &serde_dynamo::Item) -> Result<OutboxRecord, RelayExtractError> {
        let get_s = |field: &str| -> Result<String, RelayExtractError> {
            match image.get(field) {
                Some(AttributeValue::S(s)) => Ok(s.clone()),
                _ => Err(RelayExtractError::MissingField(field.to_string())),
            }
        };

        let status = match get_s("status")?.as_str() {
            "pending" => OutboxStatus::Pending,
            "published" => OutboxStatus::Published,
            other => return Err(RelayExtractError::UnknownStatus(other.to_string())),
        };

        let created_at = match image.get("created_at") {
            Some(AttributeValue::N(n)) => n
                .parse()
                .map_err(|_| RelayExtractError::MissingField("created_at".to_string()))?,
            _ => return Err(RelayExtractError::MissingField("created_at".to_string())),
        };

        let published_at = match image.get("published_at") {
            Some(AttributeValue::N(n)) => n.parse().ok(),
            _ => None,
        };

        Ok(OutboxRecord {
            id: get_s("id")?,
            tenant_id: get_s("tenant_id")?,
            envelope_id: get_s("envelope_id")?,
            source: get_s("source")?,
            detail_type: get_s("detail_type")?,
            event_json: get_s("event_json")?,
            status,
            created_at,
            published_at,
        })
    }
}
