/// EventBridgeへのドメインイベント発行
///
/// アウトボックスリレーが使う。PutEventsは部分失敗があり得るため、
/// エントリ単位の結果を入力と同じ順序で返す。
///
/// 要件: 4.2
use async_trait::async_trait;
use aws_sdk_eventbridge::Client as EventBridgeClient;
use aws_sdk_eventbridge::types::PutEventsRequestEntry;
use thiserror::Error;
use tracing::{info, warn};

/// イベント発行のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EventBusError {
    /// PutEvents呼び出し自体に失敗
    #[error("Publish error: {0}")]
    PublishError(String),
}

/// 発行するイベント
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    /// イベントソース（例: esign.signing）
    pub source: String,
    /// detail-type（例: envelope.sent）
    pub detail_type: String,
    /// detail本体のJSON
    pub detail_json: String,
}

/// エントリ単位の発行結果
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// バスに受理された
    Accepted,
    /// バスに拒否された（エラーコードとメッセージ）
    Rejected(String),
}

/// イベントバス用トレイト
///
/// 異なる実装を可能にします（実際のEventBridge、テスト用モック）。
#[async_trait]
pub trait EventBus: Send + Sync {
    /// イベントを発行し、入力と同順の結果を返す
    ///
    /// # 戻り値
    /// * `Ok(Vec<PublishOutcome>)` - eventsと同じ長さ・順序の結果
    /// * `Err(EventBusError)` - 呼び出し自体の失敗
    async fn publish(&self, events: &[OutboundEvent])
    -> Result<Vec<PublishOutcome>, EventBusError>;
}

/// EventBusのEventBridge実装
#[derive(Debug, Clone)]
pub struct EventBridgeBus {
    /// EventBridgeクライアント
    client: EventBridgeClient,
    /// 発行先バス名
    bus_name: String,
}

// PutEventsは1回の呼び出しにつき10エントリまで
const MAX_ENTRIES_PER_CALL: usize = 10;

impl EventBridgeBus {
    /// 新しいEventBridgeBusを作成
    pub fn new(client: EventBridgeClient, bus_name: String) -> Self {
        Self { client, bus_name }
    }
}

#[async_trait]
impl EventBus for EventBridgeBus {
    async fn publish(
        &self,
        events: &[OutboundEvent],
    ) -> Result<Vec<PublishOutcome>, EventBusError> {
        let mut outcomes = Vec::with_capacity(events.len());

        for chunk in events.chunks(MAX_ENTRIES_PER_CALL) {
            let mut entries = Vec::with_capacity(chunk.len());
            for event in chunk {
                entries.push(
                    PutEventsRequestEntry::builder()
                        .event_bus_name(&self.bus_name)
                        .source(&event.source)
                        .detail_type(&event.detail_type)
                        .detail(&event.detail_json)
                        .build(),
                );
            }

            let result = self
                .client
                .put_events()
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| EventBusError::PublishError(e.into_service_error().to_string()))?;

            if result.failed_entry_count() > 0 {
                warn!(
                    bus_name = %self.bus_name,
                    failed = result.failed_entry_count(),
                    "PutEvents部分失敗"
                );
            }

            let result_entries = result.entries();
            for (i, event) in chunk.iter().enumerate() {
                let outcome = match result_entries.get(i) {
                    Some(entry) => match entry.error_code() {
                        Some(code) => PublishOutcome::Rejected(format!(
                            "{code}: {}",
                            entry.error_message().unwrap_or("unknown")
                        )),
                        None => PublishOutcome::Accepted,
                    },
                    None => PublishOutcome::Rejected("no result entry returned".to_string()),
                };
                if let PublishOutcome::Rejected(reason) = &outcome {
                    warn!(
                        detail_type = %event.detail_type,
                        reason = %reason,
                        "イベント発行拒否"
                    );
                }
                outcomes.push(outcome);
            }
        }

        info!(
            bus_name = %self.bus_name,
            total = events.len(),
            accepted = outcomes.iter().filter(|o| **o == PublishOutcome::Accepted).count(),
            "イベント発行完了"
        );

        Ok(outcomes)
    }
}
