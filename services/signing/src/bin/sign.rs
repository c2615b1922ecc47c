/// 署名記録ハンドラー
///
/// 署名者のアクセストークンを検証して署名を記録する。
/// 最後の署名者だった場合はKMS署名による文書封緘まで実行し、
/// 封筒をCompletedに遷移させる。
///
/// 要件: 1.4, 2.3, 2.4, 3.1, 3.7
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use signing::application::{SignEnvelopeHandler, SignError, SignRequest};
use signing::infrastructure::{
    init_logging, DynamoEnvelopeRepository, KmsSigner, S3DocumentStore, SigningConfig,
    SsmCertLoader,
};
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
/// 2. SignEnvelopeHandlerで署名を記録（最終署名者なら封緘も実行）
/// 3. 成功時は200、検証エラーは403、競合は409を返却
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

    let request: SignRequest = match parse_request(&event.payload) {
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
    let kms_client = aws_sdk_kms::Client::new(&aws_config);
    let ssm_client = aws_sdk_ssm::Client::new(&aws_config);
    let s3_client = aws_sdk_s3::Client::new(&aws_config);

    let envelope_repo = DynamoEnvelopeRepository::new(
        dynamodb_client,
        config.envelopes_table().to_string(),
        config.outbox_table().to_string(),
    );
    let remote_signer = KmsSigner::new(kms_client, config.kms_signing_key_id().to_string());
    let certificates = SsmCertLoader::new(ssm_client, config.signing_cert_param().to_string());
    let documents = S3DocumentStore::new(s3_client, config.documents_bucket().to_string());

    // SignEnvelopeHandlerを作成して署名を処理
    let sign_handler = SignEnvelopeHandler::new(envelope_repo, remote_signer, certificates, documents);
    let now = chrono::Utc::now().timestamp();

    match sign_handler.handle(request, now).await {
        Ok(response) => {
            info!(
                envelope_id = %response.envelope_id,
                completed = response.completed,
                "署名リクエスト成功"
            );
            Ok(serde_json::json!({
                "statusCode": 200,
                "body": serde_json::to_string(&response)?
            }))
        }
        Err(err) => {
            error!(error = %err, "署名の記録に失敗");
            let (status, body) = match &err {
                SignError::NotFound(_) => (404, err.to_string()),
                SignError::Validation(_) => (403, err.to_string()),
                SignError::Transition(_) => (409, err.to_string()),
                SignError::Conflict => (409, err.to_string()),
                SignError::Completion(_)
                | SignError::RepositoryError(_)
                | SignError::EventError(_) => (500, "Internal server error".to_string()),
            };
            Ok(serde_json::json!({
                "statusCode": status,
                "body": body
            }))
        }
    }
}
