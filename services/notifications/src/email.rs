/// メール送信モジュール
///
/// SESv2によるプレーンテキストメールの送信を提供する。
/// 本文の組み立ては各戦略側で行い、ここは送信のみを担当する。
use async_trait::async_trait;
use aws_sdk_sesv2::Client as SesClient;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use thiserror::Error;
use tracing::info;

/// メール送信のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmailError {
    /// メールの組み立てに失敗
    #[error("failed to build email: {0}")]
    BuildError(String),

    /// 送信リクエストに失敗
    #[error("failed to send email: {0}")]
    SendError(String),
}

/// 送信するメールの内容
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    /// 宛先アドレス
    pub to: Vec<String>,
    /// 件名
    pub subject: String,
    /// プレーンテキスト本文
    pub body: String,
}

/// メール送信の抽象化
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// メールを送信する
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// EmailSenderのSESv2実装
#[derive(Debug, Clone)]
pub struct SesEmailSender {
    /// SESv2クライアント
    client: SesClient,
    /// 送信元アドレス
    sender_address: String,
}

impl SesEmailSender {
    /// 新しいSesEmailSenderを作成
    pub fn new(client: SesClient, sender_address: String) -> Self {
        Self {
            client,
            sender_address,
        }
    }
}

#[async_trait]
impl EmailSender for SesEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let destination = Destination::builder()
            .set_to_addresses(Some(message.to.clone()))
            .build();

        let subject = Content::builder()
            .data(&message.subject)
            .build()
            .map_err(|e| EmailError::BuildError(e.to_string()))?;
        let text = Content::builder()
            .data(&message.body)
            .build()
            .map_err(|e| EmailError::BuildError(e.to_string()))?;
        let ses_message = Message::builder()
            .subject(subject)
            .body(Body::builder().text(text).build())
            .build();
        let content = EmailContent::builder().simple(ses_message).build();

        self.client
            .send_email()
            .from_email_address(&self.sender_address)
            .destination(destination)
            .content(content)
            .send()
            .await
            .map_err(|e| EmailError::SendError(e.into_service_error().to_string()))?;

        info!(
            recipient_count = message.to.len(),
            subject = %message.subject,
            "メールを送信"
        );
        Ok(())
    }
}
