/// 文書閲覧HTTP Lambdaエントリポイント
///
/// Lambda Function URL経由のHTTPリクエストを処理し、文書への
/// 署名付きURLを返却する。署名者はアクセストークンで認証し、
/// クエリパラメータなしの場合は送信者向け（テナントAPI経由）とみなす。
///
/// 要件: 6.1, 7.2
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use signing::application::{ViewDocumentHandler, ViewError, ViewRequest};
use signing::infrastructure::{
    init_logging, DynamoEnvelopeRepository, S3DocumentStore, SigningConfig,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    info!("文書閲覧Lambda関数を初期化");

    // Lambda関数を実行
    run(service_fn(handler)).await
}

/// クエリパラメータからViewRequestを組み立てる
///
/// tenant_idとenvelope_idは必須。signer_idとaccess_tokenは
/// 署名者閲覧の場合のみ指定される。
fn parse_view_request(request: &Request) -> Result<ViewRequest, &'static str> {
    let params = request.query_string_parameters();

    let Some(tenant_id) = params.first("tenant_id") else {
        return Err("tenant_id and envelope_id are required");
    };
    let Some(envelope_id) = params.first("envelope_id") else {
        return Err("tenant_id and envelope_id are required");
    };

    Ok(ViewRequest {
        tenant_id: tenant_id.to_string(),
        envelope_id: envelope_id.to_string(),
        signer_id: params.first("signer_id").map(String::from),
        access_token: params.first("access_token").map(String::from),
    })
}

/// テキストボディのHTTPレスポンスを生成
fn text_response(status: u16, message: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(message.to_string()))?)
}

/// HTTPリクエストハンドラー
///
/// # 処理フロー
/// 1. クエリパラメータからリクエストを組み立て
/// 2. ViewDocumentHandlerで検証と署名付きURL発行
/// 3. 成功時は200とURL情報、認可エラーは403を返却
async fn handler(request: Request) -> Result<Response<Body>, Error> {
    // 設定を環境から読み込み
    let config = match SigningConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "設定の読み込みに失敗");
            return text_response(500, "Internal server error");
        }
    };

    let view_request = match parse_view_request(&request) {
        Ok(view_request) => view_request,
        Err(message) => {
            error!(message = message, "リクエストの解析に失敗");
            return text_response(400, message);
        }
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&aws_config);
    let s3_client = aws_sdk_s3::Client::new(&aws_config);

    let envelope_repo = DynamoEnvelopeRepository::new(
        dynamodb_client,
        config.envelopes_table().to_string(),
        config.outbox_table().to_string(),
    );
    let documents = S3DocumentStore::new(s3_client, config.documents_bucket().to_string());

    // ViewDocumentHandlerを作成して閲覧リクエストを処理
    let view_handler =
        ViewDocumentHandler::new(envelope_repo, documents, config.presign_expiry_secs());
    let now = chrono::Utc::now().timestamp();

    match view_handler.handle(view_request, now).await {
        Ok(response) => {
            info!(envelope_id = %response.envelope_id, "閲覧URL発行成功");
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&response)?))?)
        }
        Err(err) => {
            error!(error = %err, "閲覧URLの発行に失敗");
            match &err {
                ViewError::NotFound(_) => text_response(404, &err.to_string()),
                ViewError::AccessDenied(_) => text_response(403, &err.to_string()),
                ViewError::RepositoryError(_) | ViewError::StorageError(_) => {
                    text_response(500, "Internal server error")
                }
            }
        }
    }
}
