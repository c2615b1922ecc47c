/// アウトボックス中継Lambda関数
///
/// アウトボックステーブルのDynamoDB Streamsイベントを受け取り、
/// pendingレコードをEventBridgeに発行して発行済みマークを付与する。
/// 発行に失敗したレコードはストリームの再試行とredriveで救済される。
///
/// 要件: 4.2, 4.3, 4.4
use aws_lambda_events::event::dynamodb::Event;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use signing::application::OutboxRelayHandler;
use signing::infrastructure::{
    init_logging, DynamoOutboxRepository, EventBridgeBus, OpsAlert, SigningConfig, SnsOpsAlert,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // Lambda関数を初期化して実行
    let func = service_fn(handler);
    lambda_runtime::run(func).await?;
    Ok(())
}

/// Lambda関数のメインハンドラー
///
/// # 処理フロー
/// 1. 設定を環境変数から読み込み
/// 2. OutboxRelayHandlerでストリームレコードを処理
/// 3. 失敗があればSNSに通知した上でエラーを返す（Lambda再試行をトリガー）
async fn handler(event: LambdaEvent<Event>) -> Result<(), Error> {
    let event = event.payload;
    let record_count = event.records.len();

    info!(
        record_count = record_count,
        "アウトボックスストリームイベントを受信"
    );

    // 設定を環境変数から読み込み
    let config = match SigningConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "設定の読み込みに失敗");
            return Err(err.into());
        }
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let eventbridge_client = aws_sdk_eventbridge::Client::new(&aws_config);
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&aws_config);

    let event_bus = EventBridgeBus::new(eventbridge_client, config.event_bus_name().to_string());
    let outbox_repo = DynamoOutboxRepository::new(dynamodb_client, config.outbox_table().to_string());

    // OutboxRelayHandlerを作成してイベントを処理
    let relay_handler = OutboxRelayHandler::new(event_bus, outbox_repo);
    let now = chrono::Utc::now().timestamp();
    let result = relay_handler.process_event(event, now).await;

    // 処理結果をログに記録
    info!(
        published_count = result.published_count,
        skipped_count = result.skipped_count,
        failed_count = result.failed_count,
        "アウトボックス中継完了"
    );

    // 失敗があった場合は運用通知してエラーを返す（Lambda再試行をトリガー）
    if result.failed_count > 0 {
        if let Some(topic_arn) = config.ops_topic_arn() {
            let sns_client = aws_sdk_sns::Client::new(&aws_config);
            let alerter = SnsOpsAlert::new(sns_client, topic_arn.to_string());
            let message = format!(
                "outbox relay failures: published={}, skipped={}, failed={}",
                result.published_count, result.skipped_count, result.failed_count
            );
            if let Err(err) = alerter.alert("Outbox relay failures", &message).await {
                warn!(error = %err, "運用通知の送信に失敗");
            }
        }
        return Err(format!(
            "アウトボックス中継に失敗: {} 件の失敗",
            result.failed_count
        )
        .into());
    }

    Ok(())
}
