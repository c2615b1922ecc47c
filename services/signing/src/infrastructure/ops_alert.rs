//! 運用アラート通知モジュール
//!
//! アウトボックスリレーや再発行CLIが検出した異常をSNSトピックへ
//! 通知する機能を提供する。
//!
//! 要件: 8.1

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// 運用アラートのエラー型
#[derive(Debug, Error)]
pub enum OpsAlertError {
    /// AWS SDK エラー
    #[error("AWS SNS APIエラー: {0}")]
    AwsSdkError(String),
    /// JSON シリアライズエラー
    #[error("JSONシリアライズエラー: {0}")]
    SerializeError(String),
}

/// アラート発行結果
#[derive(Debug, Clone)]
pub struct AlertResult {
    /// メッセージID
    pub message_id: String,
    /// 発行先トピックARN
    pub topic_arn: String,
    /// 成功したかどうか
    pub success: bool,
    /// 結果メッセージ
    pub message: String,
}

impl AlertResult {
    /// 成功結果を作成
    pub fn success(topic_arn: impl Into<String>, message_id: impl Into<String>) -> Self {
        let arn = topic_arn.into();
        let id = message_id.into();
        Self {
            message_id: id.clone(),
            topic_arn: arn,
            success: true,
            message: format!("アラートを発行しました (message_id: {})", id),
        }
    }

    /// 失敗結果を作成
    pub fn failure(topic_arn: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            message_id: String::new(),
            topic_arn: topic_arn.into(),
            success: false,
            message: format!("アラート発行に失敗しました: {}", error),
        }
    }
}

/// 運用アラート用トレイト（テスト用の抽象化）
#[async_trait]
pub trait OpsAlert: Send + Sync {
    /// アラートをSNSトピックに発行する
    ///
    /// # 引数
    /// * `subject` - メッセージの件名
    /// * `message` - 発行するメッセージ
    ///
    /// # 戻り値
    /// * `Ok(AlertResult)` - 発行結果
    /// * `Err(OpsAlertError)` - エラー
    async fn alert(&self, subject: &str, message: &str) -> Result<AlertResult, OpsAlertError>;

    /// シリアライズ可能な値をJSONとしてアラート発行する
    async fn alert_json<T: Serialize + Send + Sync>(
        &self,
        subject: &str,
        value: &T,
    ) -> Result<AlertResult, OpsAlertError> {
        let message = serde_json::to_string(value)
            .map_err(|e| OpsAlertError::SerializeError(e.to_string()))?;

        self.alert(subject, &message).await
    }
}

/// 実際のAWS SNS SDKを使用したアラート実装
pub struct SnsOpsAlert {
    client: SnsClient,
    topic_arn: String,
}

impl SnsOpsAlert {
    /// 新しいSnsOpsAlertを作成
    pub fn new(client: SnsClient, topic_arn: String) -> Self {
        Self { client, topic_arn }
    }
}

#[async_trait]
impl OpsAlert for SnsOpsAlert {
    async fn alert(&self, subject: &str, message: &str) -> Result<AlertResult, OpsAlertError> {
        info!(
            topic_arn = %self.topic_arn,
            subject = %subject,
            message_length = message.len(),
            "運用アラート発行開始"
        );

        let result = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(subject)
            .message(message)
            .send()
            .await;

        match result {
            Ok(response) => {
                let message_id = response.message_id().unwrap_or("unknown").to_string();

                info!(
                    topic_arn = %self.topic_arn,
                    message_id = %message_id,
                    "運用アラート発行成功"
                );

                Ok(AlertResult::success(&self.topic_arn, message_id))
            }
            Err(err) => {
                warn!(
                    topic_arn = %self.topic_arn,
                    error = %err,
                    "運用アラート発行エラー"
                );
                Err(OpsAlertError::AwsSdkError(err.to_string()))
            }
        }
    }
}
