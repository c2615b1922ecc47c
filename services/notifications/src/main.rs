//! e-sign通知サービス
//!
//! EventBridge経由で署名サービスのドメインイベントを受け取り、
//! 署名者・送信者へのメール通知とテナントWebhookへの配信を行う。
//! 配信ログにより同じイベントの重複配信を抑止する。

mod config;
mod delivery_log;
mod email;
mod logging;
mod strategy;
mod webhook;

use config::NotificationsConfig;
use delivery_log::DynamoDeliveryLog;
use email::SesEmailSender;
use lambda_runtime::{Error, LambdaEvent, service_fn};
use logging::init_logging;
use serde_json::Value;
use strategy::{
    CompletionStrategy, EventContext, NotificationDispatcher, SignerTurnStrategy,
    TerminalStrategy, WebhookStrategy,
};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use webhook::HttpWebhookSender;

/// ディスパッチャのウォームスタートキャッシュ
static DISPATCHER: OnceCell<NotificationDispatcher<DynamoDeliveryLog>> = OnceCell::const_new();

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // Lambda関数を初期化して実行
    let func = service_fn(handler);
    lambda_runtime::run(func).await?;
    Ok(())
}

/// ディスパッチャを取得する（コールドスタート時のみ構築）
async fn get_dispatcher() -> Result<&'static NotificationDispatcher<DynamoDeliveryLog>, Error> {
    DISPATCHER
        .get_or_try_init(|| async {
            let config = NotificationsConfig::from_env()?;

            let aws_config =
                aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let ses_client = aws_sdk_sesv2::Client::new(&aws_config);
            let dynamodb_client = aws_sdk_dynamodb::Client::new(&aws_config);

            let email_sender =
                SesEmailSender::new(ses_client, config.sender_address().to_string());
            let delivery_log = DynamoDeliveryLog::new(
                dynamodb_client,
                config.delivery_log_table().to_string(),
                config.delivery_log_ttl_secs(),
            );

            let mut dispatcher = NotificationDispatcher::new(delivery_log);
            dispatcher.register(Box::new(SignerTurnStrategy::new(
                email_sender.clone(),
                config.signing_base_url().to_string(),
            )));
            dispatcher.register(Box::new(CompletionStrategy::new(
                email_sender.clone(),
                config.view_base_url().to_string(),
            )));
            dispatcher.register(Box::new(TerminalStrategy::new(email_sender)));

            // Webhook配信はURLが設定されている場合のみ有効
            if let Some(webhook_url) = config.webhook_url() {
                let webhook_sender = HttpWebhookSender::new(
                    webhook_url,
                    config.webhook_secret().map(String::from),
                )?;
                dispatcher.register(Box::new(WebhookStrategy::new(webhook_sender)));
                info!(webhook_url = webhook_url, "Webhook配信を有効化");
            }

            info!("通知ディスパッチャを初期化");
            Ok(dispatcher)
        })
        .await
}

/// EventBridgeエンベロープからイベントコンテキストを取り出す
fn extract_context(payload: &Value) -> Option<EventContext> {
    let event_id = payload.get("id")?.as_str()?;
    let source = payload.get("source")?.as_str()?;
    let detail_type = payload.get("detail-type")?.as_str()?;
    Some(EventContext {
        event_id: event_id.to_string(),
        source: source.to_string(),
        detail_type: detail_type.to_string(),
    })
}

/// Lambda関数のメインハンドラー
///
/// # 処理フロー
/// 1. EventBridgeエンベロープからsource/detail-type/detailを取り出す
/// 2. 登録済みの戦略に配信（重複は配信ログで抑止）
/// 3. 失敗があればエラーを返す（Lambda再試行をトリガー）
async fn handler(event: LambdaEvent<Value>) -> Result<(), Error> {
    let payload = event.payload;

    let Some(ctx) = extract_context(&payload) else {
        // エンベロープの形が想定外。再試行しても直らないためスキップ
        warn!("EventBridgeエンベロープの解析に失敗、スキップ");
        return Ok(());
    };
    let detail = payload.get("detail").cloned().unwrap_or(Value::Null);

    info!(
        event_id = %ctx.event_id,
        source = %ctx.source,
        detail_type = %ctx.detail_type,
        "通知イベントを受信"
    );

    let dispatcher = get_dispatcher().await?;
    let now = chrono::Utc::now().timestamp();
    let result = dispatcher.dispatch(&ctx, &detail, now).await;

    // 処理結果をログに記録
    info!(
        delivered_count = result.delivered_count,
        duplicate_count = result.duplicate_count,
        skipped_count = result.skipped_count,
        failed_count = result.failed_count,
        "通知ディスパッチ完了"
    );

    // 失敗があった場合はエラーを返す（Lambda再試行をトリガー）
    if result.failed_count > 0 {
        return Err(format!("通知配信に失敗: {} 件の失敗", result.failed_count).into());
    }

    Ok(())
}
