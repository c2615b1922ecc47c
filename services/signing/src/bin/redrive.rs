/// アウトボックス再発行Lambda関数
///
/// ストリーム中継をすり抜けて残った古いpendingレコードを走査し、
/// EventBridgeに発行し直す。Lambda関数としても、ローカルスクリプト
/// としても実行可能。
///
/// # 環境変数
/// - ENVELOPES_TABLE: 封筒テーブル名（必須）
/// - OUTBOX_TABLE: アウトボックステーブル名（必須）
/// - DOCUMENTS_BUCKET: 文書バケット名（必須）
/// - EVENT_BUS_NAME: EventBridgeバス名（必須）
/// - KMS_SIGNING_KEY_ID: KMS署名鍵ID（必須）
/// - SIGNING_CERT_PARAM: 署名証明書のParameter Storeパス（必須）
/// - OPS_TOPIC_ARN: 運用通知SNSトピック（任意）
///
/// # Lambda実行
/// EventBridgeスケジュールから空のペイロードでトリガーする。
/// `older_than_secs`や`limit`を指定して挙動を上書きできる。
///
/// # ローカル実行
/// ```bash
/// export ENVELOPES_TABLE=esign-envelopes
/// export OUTBOX_TABLE=esign-outbox
/// export DOCUMENTS_BUCKET=esign-documents
/// export EVENT_BUS_NAME=esign-events
/// export KMS_SIGNING_KEY_ID=alias/esign-signing
/// export SIGNING_CERT_PARAM=/esign/signing-cert
///
/// # 10分以上前のpendingを再発行
/// cargo run --bin redrive
///
/// # 対象の確認のみ（発行しない）
/// cargo run --bin redrive -- --dry-run
///
/// # 走査条件を指定
/// cargo run --bin redrive -- --older-than-secs 3600 --limit 50
/// ```
///
/// 要件: 4.5, 8.1
use clap::Parser;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use signing::application::OutboxRelayHandler;
use signing::infrastructure::{
    init_logging, DynamoOutboxRepository, EventBridgeBus, OpsAlert, OutboxRepository,
    SigningConfig, SnsOpsAlert,
};
use tracing::{error, info, warn};

/// 再発行対象とみなすpendingレコードの経過秒数の既定値
const DEFAULT_OLDER_THAN_SECS: i64 = 600;

/// 1回の起動で走査するレコード数の既定値
const DEFAULT_REDRIVE_LIMIT: u32 = 100;

/// コマンドライン引数（ローカル実行用）
#[derive(Parser, Debug)]
#[command(name = "redrive")]
#[command(about = "アウトボックスの発行漏れpendingレコードをEventBridgeに再発行")]
struct CliArgs {
    /// 再発行対象とみなす経過秒数
    #[arg(long, short = 'o')]
    older_than_secs: Option<i64>,

    /// 1回の起動で走査するレコード数
    #[arg(long, short = 'l')]
    limit: Option<u32>,

    /// 対象レコードのログ出力のみ行い、発行しない
    #[arg(long)]
    dry_run: bool,
}

/// Lambda関数の入力（空または設定オーバーライド）
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RedriveInput {
    /// 経過秒数のオーバーライド
    older_than_secs: Option<i64>,
    /// 走査レコード数のオーバーライド
    limit: Option<u32>,
    /// 対象レコードのログ出力のみ行い、発行しない
    dry_run: bool,
}

/// Lambda関数の出力
#[derive(Debug, Serialize)]
struct RedriveOutput {
    /// 処理成功フラグ
    success: bool,
    /// 走査で見つかった発行漏れレコード数
    stale_count: usize,
    /// 再発行されたレコード数
    published_count: usize,
    /// 再発行に失敗したレコード数
    failed_count: usize,
    /// エラーメッセージ（エラー時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

/// 再発行処理の集計
struct RedriveSummary {
    stale_count: usize,
    published_count: usize,
    failed_count: usize,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    // Lambda環境かどうかを判定
    if std::env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
        // Lambda環境で実行
        info!("Lambda関数として起動");
        let func = service_fn(handler);
        lambda_runtime::run(func).await?;
    } else {
        // ローカル環境で実行
        info!("ローカルスクリプトとして起動");
        run_local().await?;
    }

    Ok(())
}

/// Lambda関数のメインハンドラー
async fn handler(event: LambdaEvent<RedriveInput>) -> Result<RedriveOutput, Error> {
    let input = event.payload;
    let older_than_secs = input.older_than_secs.unwrap_or(DEFAULT_OLDER_THAN_SECS);
    let limit = input.limit.unwrap_or(DEFAULT_REDRIVE_LIMIT);

    info!(
        older_than_secs = older_than_secs,
        limit = limit,
        dry_run = input.dry_run,
        "アウトボックス再発行を開始"
    );

    match run_redrive(older_than_secs, limit, input.dry_run).await {
        Ok(summary) => Ok(RedriveOutput {
            success: true,
            stale_count: summary.stale_count,
            published_count: summary.published_count,
            failed_count: summary.failed_count,
            error_message: None,
        }),
        Err(e) => {
            error!(error = %e, "アウトボックス再発行に失敗");
            Ok(RedriveOutput {
                success: false,
                stale_count: 0,
                published_count: 0,
                failed_count: 0,
                error_message: Some(e.to_string()),
            })
        }
    }
}

/// ローカル実行用関数
async fn run_local() -> Result<(), Error> {
    // コマンドライン引数をパース
    let args = CliArgs::parse();

    info!(
        older_than_secs = ?args.older_than_secs,
        limit = ?args.limit,
        dry_run = args.dry_run,
        "コマンドライン引数をパース"
    );

    let older_than_secs = args.older_than_secs.unwrap_or(DEFAULT_OLDER_THAN_SECS);
    let limit = args.limit.unwrap_or(DEFAULT_REDRIVE_LIMIT);

    match run_redrive(older_than_secs, limit, args.dry_run).await {
        Ok(summary) => {
            info!(
                stale_count = summary.stale_count,
                published_count = summary.published_count,
                failed_count = summary.failed_count,
                "アウトボックス再発行完了"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "アウトボックス再発行に失敗");
            Err(e)
        }
    }
}

/// 再発行を実行
///
/// # 引数
/// * `older_than_secs` - 再発行対象とみなす経過秒数
/// * `limit` - 走査するレコード数の上限
/// * `dry_run` - trueなら対象レコードをログ出力するだけで発行しない
async fn run_redrive(
    older_than_secs: i64,
    limit: u32,
    dry_run: bool,
) -> Result<RedriveSummary, Error> {
    let config = SigningConfig::from_env()?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&aws_config);

    let outbox_repo = DynamoOutboxRepository::new(dynamodb_client, config.outbox_table().to_string());

    let now = chrono::Utc::now().timestamp();
    let older_than = now - older_than_secs;

    if dry_run {
        // 対象レコードをログ出力するのみ
        let stale = outbox_repo.scan_stale(older_than, limit).await?;
        for record in &stale {
            info!(
                record_id = %record.id,
                detail_type = %record.detail_type,
                created_at = record.created_at,
                "発行漏れレコード（dry-run）"
            );
        }
        return Ok(RedriveSummary {
            stale_count: stale.len(),
            published_count: 0,
            failed_count: 0,
        });
    }

    let eventbridge_client = aws_sdk_eventbridge::Client::new(&aws_config);
    let event_bus = EventBridgeBus::new(eventbridge_client, config.event_bus_name().to_string());

    // OutboxRelayHandlerを作成して再発行を実行
    let relay_handler = OutboxRelayHandler::new(event_bus, outbox_repo);
    let result = relay_handler.redrive(older_than, limit, now).await?;

    // 失敗があった場合は運用通知
    if result.failed_count > 0 {
        if let Some(topic_arn) = config.ops_topic_arn() {
            let sns_client = aws_sdk_sns::Client::new(&aws_config);
            let alerter = SnsOpsAlert::new(sns_client, topic_arn.to_string());
            let payload = serde_json::json!({
                "older_than_secs": older_than_secs,
                "published_count": result.published_count,
                "failed_count": result.failed_count,
            });
            if let Err(err) = alerter.alert_json("Outbox redrive failures", &payload).await {
                warn!(error = %err, "運用通知の送信に失敗");
            }
        }
    }

    Ok(RedriveSummary {
        stale_count: result.published_count + result.failed_count,
        published_count: result.published_count,
        failed_count: result.failed_count,
    })
}
