/// 封筒送信ハンドラー
///
/// テナントAPIからの送信リクエストを処理し、封筒を作成して
/// Sentに遷移させる。最初の順番の署名者トークンもここで発行される。
///
/// 要件: 1.1, 1.2, 2.2, 2.3
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use signing::application::{SendEnvelopeHandler, SendEnvelopeRequest, SendError};
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
///
/// # 処理フロー
/// 1. 設定を環境から読み込み
/// 2. SendEnvelopeHandlerで封筒を作成・送信
/// 3. 成功時は200と署名者トークン情報、失敗時はエラーコードを返却
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

    let request: SendEnvelopeRequest = match parse_request(&event.payload) {
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

    // EnvelopeRepositoryを作成
    let envelope_repo = DynamoEnvelopeRepository::new(
        dynamodb_client,
        config.envelopes_table().to_string(),
        config.outbox_table().to_string(),
    );

    // SendEnvelopeHandlerを作成して送信を処理
    let send_handler = SendEnvelopeHandler::new(envelope_repo, config.envelope_ttl_secs());
    let now = chrono::Utc::now().timestamp();

    match send_handler.handle(request, now).await {
        Ok(response) => {
            info!(envelope_id = %response.envelope_id, "封筒送信リクエスト成功");
            Ok(serde_json::json!({
                "statusCode": 200,
                "body": serde_json::to_string(&response)?
            }))
        }
        Err(err) => {
            error!(error = %err, "封筒送信に失敗");
            let (status, body) = match &err {
                SendError::Validation(_) => (400, err.to_string()),
                SendError::AlreadyExists(_) => (409, err.to_string()),
                SendError::RepositoryError(_) | SendError::EventError(_) => {
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
