/// 封筒無効化ハンドラー
///
/// 送信者による封筒の取り下げを処理する。認証はテナントAPI側で
/// 済んでいる前提のため、ここではアクセストークンを要求しない。
///
/// 要件: 1.6
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use signing::application::{VoidEnvelopeHandler, VoidError, VoidRequest};
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

    let request: VoidRequest = match parse_request(&event.payload) {
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

    // VoidEnvelopeHandlerを作成して無効化を処理
    let void_handler = VoidEnvelopeHandler::new(envelope_repo);
    let now = chrono::Utc::now().timestamp();

    match void_handler.handle(request, now).await {
        Ok(response) => {
            info!(envelope_id = %response.envelope_id, "無効化リクエスト成功");
            Ok(serde_json::json!({
                "statusCode": 200,
                "body": serde_json::to_string(&response)?
            }))
        }
        Err(err) => {
            error!(error = %err, "封筒の無効化に失敗");
            let (status, body) = match &err {
                VoidError::NotFound(_) => (404, err.to_string()),
                VoidError::Transition(_) => (409, err.to_string()),
                VoidError::Conflict => (409, err.to_string()),
                VoidError::RepositoryError(_) | VoidError::EventError(_) => {
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
