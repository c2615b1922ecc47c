/// 期限切れスイープLambda関数
///
/// EventBridgeスケジュールから定期起動され、署名期限を過ぎた
/// Sent封筒をExpiredに遷移させる。1回の起動で処理する件数には
/// 上限があり、残りは次回のスケジュール起動で処理される。
///
/// 要件: 1.7
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use signing::application::ExpireSweepHandler;
use signing::infrastructure::{init_logging, DynamoEnvelopeRepository, SigningConfig};
use tracing::{error, info};

/// 1回の起動で処理する候補数の既定値
const DEFAULT_SWEEP_LIMIT: u32 = 100;

/// Lambda関数の入力（空または設定オーバーライド）
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ExpireInput {
    /// 処理件数上限のオーバーライド
    limit: Option<u32>,
}

/// Lambda関数の出力
#[derive(Debug, Serialize)]
struct ExpireOutput {
    /// 処理成功フラグ
    success: bool,
    /// 期限切れに遷移した封筒数
    expired_count: usize,
    /// スキップされた封筒数
    skipped_count: usize,
    /// エラーメッセージ（エラー時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    let func = service_fn(handler);
    lambda_runtime::run(func).await?;
    Ok(())
}

/// Lambda関数のメインハンドラー
async fn handler(event: LambdaEvent<ExpireInput>) -> Result<ExpireOutput, Error> {
    let input = event.payload;
    let limit = input.limit.unwrap_or(DEFAULT_SWEEP_LIMIT);

    info!(limit = limit, "期限切れスイープを開始");

    // 設定を環境から読み込み
    let config = match SigningConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "設定の読み込みに失敗");
            return Ok(ExpireOutput {
                success: false,
                expired_count: 0,
                skipped_count: 0,
                error_message: Some(err.to_string()),
            });
        }
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&aws_config);

    let envelope_repo = DynamoEnvelopeRepository::new(
        dynamodb_client,
        config.envelopes_table().to_string(),
        config.outbox_table().to_string(),
    );

    // ExpireSweepHandlerを作成してスイープを実行
    let sweep_handler = ExpireSweepHandler::new(envelope_repo);
    let now = chrono::Utc::now().timestamp();

    match sweep_handler.handle(now, limit).await {
        Ok(result) => Ok(ExpireOutput {
            success: true,
            expired_count: result.expired_count,
            skipped_count: result.skipped_count,
            error_message: None,
        }),
        Err(err) => {
            error!(error = %err, "期限切れスイープに失敗");
            Ok(ExpireOutput {
                success: false,
                expired_count: 0,
                skipped_count: 0,
                error_message: Some(err.to_string()),
            })
        }
    }
}
