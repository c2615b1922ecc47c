/// 署名拒否ハンドラー
///
/// 署名者のアクセストークンを検証して拒否を記録する。
/// 拒否が成立すると封筒はDeclinedになり、以降の全トークンが失効する。
///
/// 要件: 1.5, 2.4
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use signing::application::{DeclineEnvelopeHandler, DeclineError, DeclineRequest};
use signing::infrastructure::{init_logging, DynamoEnvelopeRepository, SigningConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    // Lambda関数を初期化して実行
    let func = service_fn(handler);
    lambda_runtime::run(func).await?;
    Ok(())
}

/// API Gatewayプロキシ形式のbody、または直接呼び出しのペイロードから
/// リクエストを取り出す
fn parse_request<T: DeserializeOwned>(payload: &Value) -> Result<T, serde_json::Error> {
    match payload.get("body").and_then(|b| b.as_str()) {
        Some(body) => serde_json::from_str(body),
        None => serde_json::from_value(payload.clone()),
    }
}

/// Lambda関数のメインハンドラー
async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
    // 設定を環境から読み込み
    let config = match SigningConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "設定の読み込みに失敗");
            return Ok(serde_json::json!({
                "statusCode": 500,
                "body": "Internal server error"
            }));
        }
    };

    let request: DeclineRequest = match parse_request(&event.payload) {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "リクエストの解析に失敗");
            return Ok(serde_json::json!({
                "statusCode": 400,
                "body": "Invalid request"
            }));
        }
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&aws_config);

    let envelope_repo = DynamoEnvelopeRepository::new(
        dynamodb_client,
        config.envelopes_table().to_string(),
        config.outbox_table().to_string(),
    );

    // DeclineEnvelopeHandlerを作成して拒否を処理
    let decline_handler = DeclineEnvelopeHandler::new(envelope_repo);
    let now = chrono::Utc::now().timestamp();

    match decline_handler.handle(request, now).await {
        Ok(response) => {
            info!(envelope_id = %response.envelope_id, "拒否リクエスト成功");
            Ok(serde_json::json!({
                "statusCode": 200,
                "body": serde_json::to_string(&response)?
            }))
        }
        Err(err) => {
            error!(error = %err, "拒否の記録に失敗");
            let (status, body) = match &err {
                DeclineError::NotFound(_) => (404, err.to_string()),
                DeclineError::Validation(_) => (403, err.to_string()),
                DeclineError::Transition(_) => (409, err.to_string()),
                DeclineError::Conflict => (409, err.to_string()),
                DeclineError::RepositoryError(_) | DeclineError::EventError(_) => {
                    (500, "Internal server error".to_string())
                }
            };
            Ok(serde_json::json!({
                "statusCode": status,
                "body": body
            }))
        }
    }
}
