/// 通知戦略モジュール
///
/// EventBridgeから受け取ったドメインイベントを、登録済みの戦略に
/// 振り分けて配信する。戦略ごとに配信ログで重複を抑止し、実行に
/// 失敗した戦略のログは取り消して再試行に備える。
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::delivery_log::{ClaimResult, DeliveryLog};
use crate::email::{EmailError, EmailMessage, EmailSender};
use crate::webhook::{WebhookError, WebhookPayload, WebhookSender};

/// 署名サービスが発行するイベントのソース名
pub const EVENT_SOURCE: &str = "esign.signing";

/// 通知実行のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    /// イベントdetailに必須フィールドがない
    #[error("event detail missing field: {0}")]
    MissingField(String),

    /// メール配信に失敗
    #[error("email delivery failed: {0}")]
    Email(String),

    /// Webhook配信に失敗
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
}

impl From<EmailError> for StrategyError {
    fn from(err: EmailError) -> Self {
        StrategyError::Email(err.to_string())
    }
}

impl From<WebhookError> for StrategyError {
    fn from(err: WebhookError) -> Self {
        StrategyError::Webhook(err.to_string())
    }
}

/// EventBridgeイベントのエンベロープ情報
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    /// EventBridgeが採番したイベントID（配信ログのキーに使用）
    pub event_id: String,
    /// イベントソース
    pub source: String,
    /// イベント種別（detail-type）
    pub detail_type: String,
}

/// 通知戦略の抽象化
///
/// 1つのイベントを複数の戦略が処理してよい。各戦略の配信は
/// 配信ログ上で独立に記録される。
#[async_trait]
pub trait NotificationStrategy: Send + Sync {
    /// 配信ログのキーに使う戦略名
    fn name(&self) -> &'static str;

    /// このsourceとdetail-typeの組を処理するかどうか
    fn handles(&self, source: &str, detail_type: &str) -> bool;

    /// 通知を実行する
    async fn execute(&self, ctx: &EventContext, detail: &Value) -> Result<(), StrategyError>;
}

/// detailから文字列フィールドを取り出す
fn detail_str<'a>(detail: &'a Value, field: &str) -> Result<&'a str, StrategyError> {
    detail
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| StrategyError::MissingField(field.to_string()))
}

// ==================== 順番開始メール戦略 ====================

/// 順番が始まった署名者に署名リンク付きメールを送る
pub struct SignerTurnStrategy<E: EmailSender> {
    email_sender: E,
    signing_base_url: String,
}

impl<E: EmailSender> SignerTurnStrategy<E> {
    /// 新しいSignerTurnStrategyを作成
    pub fn new(email_sender: E, signing_base_url: String) -> Self {
        Self {
            email_sender,
            signing_base_url,
        }
    }
}

#[async_trait]
impl<E: EmailSender> NotificationStrategy for SignerTurnStrategy<E> {
    fn name(&self) -> &'static str {
        "signer_turn_email"
    }

    fn handles(&self, source: &str, detail_type: &str) -> bool {
        source == EVENT_SOURCE && detail_type == "signer.turn_started"
    }

    async fn execute(&self, _ctx: &EventContext, detail: &Value) -> Result<(), StrategyError> {
        let tenant_id = detail_str(detail, "tenant_id")?;
        let envelope_id = detail_str(detail, "envelope_id")?;
        let signer_id = detail_str(detail, "signer_id")?;
        let signer_email = detail_str(detail, "signer_email")?;
        let signer_name = detail_str(detail, "signer_name")?;
        let title = detail_str(detail, "title")?;
        let access_token = detail_str(detail, "access_token")?;

        // トークンはこのリンクにしか現れない。リンクを知る者だけが署名できる
        let link = format!(
            "{}?tenant_id={}&envelope_id={}&signer_id={}&access_token={}",
            self.signing_base_url, tenant_id, envelope_id, signer_id, access_token
        );

        let message = EmailMessage {
            to: vec![signer_email.to_string()],
            subject: format!("Your signature is requested: {title}"),
            body: format!(
                "Hello {signer_name},\n\n\
                 It is your turn to sign \"{title}\".\n\n\
                 Review and sign the document here:\n{link}\n"
            ),
        };
        self.email_sender.send(&message).await?;

        info!(
            envelope_id = envelope_id,
            signer_id = signer_id,
            "署名順番通知メールを送信"
        );
        Ok(())
    }
}

// ==================== 完了メール戦略 ====================

/// 完了した封筒の送信者と全署名者に完了メールを送る
pub struct CompletionStrategy<E: EmailSender> {
    email_sender: E,
    view_base_url: String,
}

impl<E: EmailSender> CompletionStrategy<E> {
    /// 新しいCompletionStrategyを作成
    pub fn new(email_sender: E, view_base_url: String) -> Self {
        Self {
            email_sender,
            view_base_url,
        }
    }
}

#[async_trait]
impl<E: EmailSender> NotificationStrategy for CompletionStrategy<E> {
    fn name(&self) -> &'static str {
        "completion_email"
    }

    fn handles(&self, source: &str, detail_type: &str) -> bool {
        source == EVENT_SOURCE && detail_type == "envelope.completed"
    }

    async fn execute(&self, _ctx: &EventContext, detail: &Value) -> Result<(), StrategyError> {
        let tenant_id = detail_str(detail, "tenant_id")?;
        let envelope_id = detail_str(detail, "envelope_id")?;
        let title = detail_str(detail, "title")?;
        let sender_email = detail_str(detail, "sender_email")?;
        let signer_emails = detail
            .get("signer_emails")
            .and_then(Value::as_array)
            .ok_or_else(|| StrategyError::MissingField("signer_emails".to_string()))?;

        // 送信者と署名者をまとめて宛先にする（重複は除く）
        let mut recipients = vec![sender_email.to_string()];
        for email in signer_emails.iter().filter_map(Value::as_str) {
            if !recipients.iter().any(|r| r == email) {
                recipients.push(email.to_string());
            }
        }

        let link = format!(
            "{}?tenant_id={}&envelope_id={}",
            self.view_base_url, tenant_id, envelope_id
        );

        let message = EmailMessage {
            to: recipients,
            subject: format!("Completed: {title}"),
            body: format!(
                "All parties have signed \"{title}\".\n\n\
                 Download the sealed document here:\n{link}\n"
            ),
        };
        self.email_sender.send(&message).await?;

        info!(envelope_id = envelope_id, "完了通知メールを送信");
        Ok(())
    }
}

// ==================== 終端通知メール戦略 ====================

/// 拒否・無効化・期限切れを送信者に知らせる
pub struct TerminalStrategy<E: EmailSender> {
    email_sender: E,
}

impl<E: EmailSender> TerminalStrategy<E> {
    /// 新しいTerminalStrategyを作成
    pub fn new(email_sender: E) -> Self {
        Self { email_sender }
    }
}

#[async_trait]
impl<E: EmailSender> NotificationStrategy for TerminalStrategy<E> {
    fn name(&self) -> &'static str {
        "terminal_email"
    }

    fn handles(&self, source: &str, detail_type: &str) -> bool {
        source == EVENT_SOURCE
            && matches!(
                detail_type,
                "envelope.declined" | "envelope.voided" | "envelope.expired"
            )
    }

    async fn execute(&self, ctx: &EventContext, detail: &Value) -> Result<(), StrategyError> {
        let envelope_id = detail_str(detail, "envelope_id")?;
        let title = detail_str(detail, "title")?;
        let sender_email = detail_str(detail, "sender_email")?;

        let (subject, body) = match ctx.detail_type.as_str() {
            "envelope.declined" => {
                let signer_email = detail_str(detail, "signer_email")?;
                let reason = detail_str(detail, "reason")?;
                (
                    format!("Declined: {title}"),
                    format!(
                        "\"{title}\" was declined by {signer_email}.\n\nReason: {reason}\n"
                    ),
                )
            }
            "envelope.voided" => (
                format!("Voided: {title}"),
                format!("\"{title}\" was voided and is no longer active.\n"),
            ),
            _ => (
                format!("Expired: {title}"),
                format!("\"{title}\" expired before all parties signed.\n"),
            ),
        };

        let message = EmailMessage {
            to: vec![sender_email.to_string()],
            subject,
            body,
        };
        self.email_sender.send(&message).await?;

        info!(
            envelope_id = envelope_id,
            detail_type = %ctx.detail_type,
            "終端通知メールを送信"
        );
        Ok(())
    }
}

// ==================== Webhook戦略 ====================

/// すべてのドメインイベントをテナントのWebhookに配信する
pub struct WebhookStrategy<W: WebhookSender> {
    webhook_sender: W,
}

impl<W: WebhookSender> WebhookStrategy<W> {
    /// 新しいWebhookStrategyを作成
    pub fn new(webhook_sender: W) -> Self {
        Self { webhook_sender }
    }
}

#[async_trait]
impl<W: WebhookSender> NotificationStrategy for WebhookStrategy<W> {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn handles(&self, source: &str, _detail_type: &str) -> bool {
        source == EVENT_SOURCE
    }

    async fn execute(&self, ctx: &EventContext, detail: &Value) -> Result<(), StrategyError> {
        let payload = WebhookPayload {
            event_id: ctx.event_id.clone(),
            source: ctx.source.clone(),
            detail_type: ctx.detail_type.clone(),
            detail: detail.clone(),
        };
        self.webhook_sender.deliver(&payload).await?;

        debug!(detail_type = %ctx.detail_type, "Webhook通知を配信");
        Ok(())
    }
}

// ==================== ディスパッチャ ====================

/// 通知ディスパッチの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// 配信に成功した戦略数
    pub delivered_count: usize,
    /// 配信済みでスキップした戦略数
    pub duplicate_count: usize,
    /// どの戦略も処理しなかったイベント数
    pub skipped_count: usize,
    /// 配信に失敗した戦略数
    pub failed_count: usize,
}

impl DispatchResult {
    /// 新しい結果を作成
    pub fn new() -> Self {
        Self {
            delivered_count: 0,
            duplicate_count: 0,
            skipped_count: 0,
            failed_count: 0,
        }
    }
}

impl Default for DispatchResult {
    fn default() -> Self {
        Self::new()
    }
}

/// 登録された戦略にイベントを振り分ける
pub struct NotificationDispatcher<L: DeliveryLog> {
    delivery_log: L,
    strategies: Vec<Box<dyn NotificationStrategy>>,
}

impl<L: DeliveryLog> NotificationDispatcher<L> {
    /// 新しいNotificationDispatcherを作成
    pub fn new(delivery_log: L) -> Self {
        Self {
            delivery_log,
            strategies: Vec::new(),
        }
    }

    /// 戦略を登録する
    pub fn register(&mut self, strategy: Box<dyn NotificationStrategy>) {
        self.strategies.push(strategy);
    }

    /// イベントを処理対象の全戦略に配信する
    ///
    /// どの戦略も処理しないイベントはログに残してスキップする
    /// （エラーにはしない）。
    pub async fn dispatch(&self, ctx: &EventContext, detail: &Value, now: i64) -> DispatchResult {
        let mut result = DispatchResult::new();
        let mut matched = false;

        for strategy in &self.strategies {
            if !strategy.handles(&ctx.source, &ctx.detail_type) {
                continue;
            }
            matched = true;
            self.dispatch_one(strategy.as_ref(), ctx, detail, now, &mut result)
                .await;
        }

        if !matched {
            info!(
                source = %ctx.source,
                detail_type = %ctx.detail_type,
                "処理対象外のイベントをスキップ"
            );
            result.skipped_count += 1;
        }

        result
    }

    /// 1戦略分の配信を実行する
    ///
    /// 配信ログを先に書いてから副作用を実行する。実行に失敗したら
    /// ログを取り消し、Lambda再試行が配信し直せるようにする。
    async fn dispatch_one(
        &self,
        strategy: &dyn NotificationStrategy,
        ctx: &EventContext,
        detail: &Value,
        now: i64,
        result: &mut DispatchResult,
    ) {
        match self
            .delivery_log
            .claim(&ctx.event_id, strategy.name(), now)
            .await
        {
            Ok(ClaimResult::Claimed) => {}
            Ok(ClaimResult::AlreadyDelivered) => {
                debug!(
                    event_id = %ctx.event_id,
                    strategy = strategy.name(),
                    "配信済みのためスキップ"
                );
                result.duplicate_count += 1;
                return;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    event_id = %ctx.event_id,
                    strategy = strategy.name(),
                    "配信記録の書き込みに失敗"
                );
                result.failed_count += 1;
                return;
            }
        }

        match strategy.execute(ctx, detail).await {
            Ok(()) => {
                result.delivered_count += 1;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    event_id = %ctx.event_id,
                    strategy = strategy.name(),
                    "通知の配信に失敗"
                );
                if let Err(release_err) = self
                    .delivery_log
                    .release(&ctx.event_id, strategy.name())
                    .await
                {
                    warn!(
                        error = %release_err,
                        event_id = %ctx.event_id,
                        strategy = strategy.name(),
                        "配信記録の取り消しに失敗"
                    );
                }
                result.failed_count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery_log::tests::MockDeliveryLog;
    use crate::delivery_log::DeliveryLogError;
    use crate::email::tests::MockEmailSender;
    use crate::webhook::tests::MockWebhookSender;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn context(detail_type: &str) -> EventContext {
        EventContext {
            event_id: "event-1".to_string(),
            source: EVENT_SOURCE.to_string(),
            detail_type: detail_type.to_string(),
        }
    }

    fn turn_started_detail() -> Value {
        json!({
            "event_type": "signer.turn_started",
            "tenant_id": "tenant-1",
            "envelope_id": "env-1",
            "signer_id": "signer-1",
            "signer_email": "alice@example.com",
            "signer_name": "Alice",
            "title": "NDA",
            "access_token": "token-abc",
            "expires_at": 1_700_100_000i64,
        })
    }

    fn completed_detail() -> Value {
        json!({
            "event_type": "envelope.completed",
            "tenant_id": "tenant-1",
            "envelope_id": "env-1",
            "title": "NDA",
            "sender_email": "sender@example.com",
            "completed_document_key": "tenants/tenant-1/envelopes/env-1/completed.pdf",
            "signer_emails": ["alice@example.com", "bob@example.com"],
        })
    }

    fn declined_detail() -> Value {
        json!({
            "event_type": "envelope.declined",
            "tenant_id": "tenant-1",
            "envelope_id": "env-1",
            "title": "NDA",
            "sender_email": "sender@example.com",
            "signer_id": "signer-1",
            "signer_email": "alice@example.com",
            "reason": "wrong terms",
        })
    }

    fn create_test_dispatcher() -> (
        NotificationDispatcher<MockDeliveryLog>,
        MockEmailSender,
        MockWebhookSender,
        MockDeliveryLog,
    ) {
        let email_sender = MockEmailSender::new();
        let webhook_sender = MockWebhookSender::new();
        let delivery_log = MockDeliveryLog::new();

        let mut dispatcher = NotificationDispatcher::new(delivery_log.clone());
        dispatcher.register(Box::new(SignerTurnStrategy::new(
            email_sender.clone(),
            "https://sign.example.com/sign".to_string(),
        )));
        dispatcher.register(Box::new(CompletionStrategy::new(
            email_sender.clone(),
            "https://sign.example.com/view".to_string(),
        )));
        dispatcher.register(Box::new(TerminalStrategy::new(email_sender.clone())));
        dispatcher.register(Box::new(WebhookStrategy::new(webhook_sender.clone())));

        (dispatcher, email_sender, webhook_sender, delivery_log)
    }

    // ==================== 5.1 振り分けテスト ====================

    /// 順番開始イベントは署名者メールとWebhookに配信される
    #[tokio::test]
    async fn test_turn_started_emails_signer_and_posts_webhook() {
        let (dispatcher, email_sender, webhook_sender, delivery_log) = create_test_dispatcher();
        let ctx = context("signer.turn_started");

        let result = dispatcher.dispatch(&ctx, &turn_started_detail(), NOW).await;

        assert_eq!(result.delivered_count, 2);
        assert_eq!(result.failed_count, 0);

        let sent = email_sender.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["alice@example.com".to_string()]);
        assert_eq!(sent[0].subject, "Your signature is requested: NDA");
        assert!(sent[0].body.contains("Hello Alice"));
        assert!(sent[0].body.contains(
            "https://sign.example.com/sign?tenant_id=tenant-1&envelope_id=env-1\
             &signer_id=signer-1&access_token=token-abc"
        ));

        let delivered = webhook_sender.delivered_payloads();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].detail_type, "signer.turn_started");

        assert_eq!(
            delivery_log.claimed_keys(),
            vec![
                "event-1#signer_turn_email".to_string(),
                "event-1#webhook".to_string(),
            ]
        );
    }

    /// 完了イベントは送信者と全署名者宛のメールになる
    #[tokio::test]
    async fn test_completed_emails_sender_and_signers() {
        let (dispatcher, email_sender, _, _) = create_test_dispatcher();
        let ctx = context("envelope.completed");

        let result = dispatcher.dispatch(&ctx, &completed_detail(), NOW).await;

        assert_eq!(result.delivered_count, 2);

        let sent = email_sender.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].to,
            vec![
                "sender@example.com".to_string(),
                "alice@example.com".to_string(),
                "bob@example.com".to_string(),
            ]
        );
        assert_eq!(sent[0].subject, "Completed: NDA");
        assert!(sent[0]
            .body
            .contains("https://sign.example.com/view?tenant_id=tenant-1&envelope_id=env-1"));
    }

    /// 完了メールの宛先から重複アドレスは除かれる
    #[tokio::test]
    async fn test_completed_deduplicates_recipients() {
        let (dispatcher, email_sender, _, _) = create_test_dispatcher();
        let ctx = context("envelope.completed");
        let mut detail = completed_detail();
        detail["signer_emails"] = json!(["sender@example.com", "alice@example.com"]);

        dispatcher.dispatch(&ctx, &detail, NOW).await;

        let sent = email_sender.sent_messages();
        assert_eq!(
            sent[0].to,
            vec![
                "sender@example.com".to_string(),
                "alice@example.com".to_string(),
            ]
        );
    }

    /// 拒否イベントは理由付きで送信者に通知される
    #[tokio::test]
    async fn test_declined_notifies_sender_with_reason() {
        let (dispatcher, email_sender, _, _) = create_test_dispatcher();
        let ctx = context("envelope.declined");

        let result = dispatcher.dispatch(&ctx, &declined_detail(), NOW).await;

        assert_eq!(result.delivered_count, 2);

        let sent = email_sender.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["sender@example.com".to_string()]);
        assert_eq!(sent[0].subject, "Declined: NDA");
        assert!(sent[0].body.contains("declined by alice@example.com"));
        assert!(sent[0].body.contains("wrong terms"));
    }

    /// 期限切れイベントは期限切れの文面になる
    #[tokio::test]
    async fn test_expired_notifies_sender() {
        let (dispatcher, email_sender, _, _) = create_test_dispatcher();
        let ctx = context("envelope.expired");
        let detail = json!({
            "event_type": "envelope.expired",
            "tenant_id": "tenant-1",
            "envelope_id": "env-1",
            "title": "NDA",
            "sender_email": "sender@example.com",
        });

        dispatcher.dispatch(&ctx, &detail, NOW).await;

        let sent = email_sender.sent_messages();
        assert_eq!(sent[0].subject, "Expired: NDA");
        assert!(sent[0].body.contains("expired before all parties signed"));
    }

    /// 中間イベント（signer.signed）はWebhookのみに配信される
    #[tokio::test]
    async fn test_signer_signed_goes_to_webhook_only() {
        let (dispatcher, email_sender, webhook_sender, _) = create_test_dispatcher();
        let ctx = context("signer.signed");
        let detail = json!({
            "event_type": "signer.signed",
            "tenant_id": "tenant-1",
            "envelope_id": "env-1",
            "signer_id": "signer-1",
            "signer_email": "alice@example.com",
            "signed_at": NOW,
        });

        let result = dispatcher.dispatch(&ctx, &detail, NOW).await;

        assert_eq!(result.delivered_count, 1);
        assert_eq!(result.skipped_count, 0);
        assert!(email_sender.sent_messages().is_empty());
        assert_eq!(webhook_sender.delivered_payloads().len(), 1);
    }

    /// 他サービスのイベントはスキップされる（エラーにしない）
    #[tokio::test]
    async fn test_foreign_source_is_skipped() {
        let (dispatcher, email_sender, webhook_sender, delivery_log) = create_test_dispatcher();
        let ctx = EventContext {
            event_id: "event-1".to_string(),
            source: "aws.health".to_string(),
            detail_type: "AWS Health Event".to_string(),
        };

        let result = dispatcher.dispatch(&ctx, &json!({}), NOW).await;

        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.delivered_count, 0);
        assert_eq!(result.failed_count, 0);
        assert!(email_sender.sent_messages().is_empty());
        assert!(webhook_sender.delivered_payloads().is_empty());
        assert!(delivery_log.claimed_keys().is_empty());
    }

    // ==================== 5.2 重複抑止テスト ====================

    /// 同じイベントの再配信は重複としてスキップされる
    #[tokio::test]
    async fn test_redelivery_is_deduplicated() {
        let (dispatcher, email_sender, webhook_sender, _) = create_test_dispatcher();
        let ctx = context("signer.turn_started");
        let detail = turn_started_detail();

        let first = dispatcher.dispatch(&ctx, &detail, NOW).await;
        let second = dispatcher.dispatch(&ctx, &detail, NOW).await;

        assert_eq!(first.delivered_count, 2);
        assert_eq!(second.delivered_count, 0);
        assert_eq!(second.duplicate_count, 2);

        // 副作用は1回だけ
        assert_eq!(email_sender.sent_messages().len(), 1);
        assert_eq!(webhook_sender.delivered_payloads().len(), 1);
    }

    /// イベントIDが違えば同じ種別でも配信される
    #[tokio::test]
    async fn test_distinct_event_ids_both_deliver() {
        let (dispatcher, email_sender, _, _) = create_test_dispatcher();
        let detail = turn_started_detail();

        let mut ctx = context("signer.turn_started");
        dispatcher.dispatch(&ctx, &detail, NOW).await;
        ctx.event_id = "event-2".to_string();
        dispatcher.dispatch(&ctx, &detail, NOW).await;

        assert_eq!(email_sender.sent_messages().len(), 2);
    }

    // ==================== 5.3 失敗処理テスト ====================

    /// メール失敗は配信記録を取り消し、他の戦略は配信される
    #[tokio::test]
    async fn test_email_failure_releases_claim() {
        let (dispatcher, email_sender, webhook_sender, delivery_log) = create_test_dispatcher();
        let ctx = context("signer.turn_started");
        email_sender.set_next_error(EmailError::SendError("throttled".to_string()));

        let result = dispatcher.dispatch(&ctx, &turn_started_detail(), NOW).await;

        assert_eq!(result.failed_count, 1);
        assert_eq!(result.delivered_count, 1);

        // 失敗した戦略の記録は取り消され、再試行が配信し直せる
        assert!(!delivery_log.is_claimed("event-1", "signer_turn_email"));
        assert!(delivery_log.is_claimed("event-1", "webhook"));
        assert_eq!(webhook_sender.delivered_payloads().len(), 1);
    }

    /// 失敗後の再配信は失敗した戦略だけを実行し直す
    #[tokio::test]
    async fn test_retry_after_failure_redelivers_only_failed_strategy() {
        let (dispatcher, email_sender, webhook_sender, _) = create_test_dispatcher();
        let ctx = context("signer.turn_started");
        let detail = turn_started_detail();
        email_sender.set_next_error(EmailError::SendError("throttled".to_string()));

        dispatcher.dispatch(&ctx, &detail, NOW).await;
        let retry = dispatcher.dispatch(&ctx, &detail, NOW).await;

        assert_eq!(retry.delivered_count, 1);
        assert_eq!(retry.duplicate_count, 1);
        assert_eq!(email_sender.sent_messages().len(), 1);
        assert_eq!(webhook_sender.delivered_payloads().len(), 1);
    }

    /// 配信記録の書き込み失敗はその戦略の失敗になり、実行もされない
    #[tokio::test]
    async fn test_claim_error_counts_as_failure() {
        let (dispatcher, email_sender, webhook_sender, delivery_log) = create_test_dispatcher();
        let ctx = context("signer.turn_started");
        delivery_log.set_next_error(DeliveryLogError::RequestFailed("timeout".to_string()));

        let result = dispatcher.dispatch(&ctx, &turn_started_detail(), NOW).await;

        assert_eq!(result.failed_count, 1);
        assert_eq!(result.delivered_count, 1);
        assert!(email_sender.sent_messages().is_empty());
        assert_eq!(webhook_sender.delivered_payloads().len(), 1);
    }

    /// detailの必須フィールド欠損はその戦略の失敗になる
    #[tokio::test]
    async fn test_missing_detail_field_fails_strategy() {
        let (dispatcher, email_sender, _, delivery_log) = create_test_dispatcher();
        let ctx = context("signer.turn_started");
        let mut detail = turn_started_detail();
        detail.as_object_mut().unwrap().remove("access_token");

        let result = dispatcher.dispatch(&ctx, &detail, NOW).await;

        assert_eq!(result.failed_count, 1);
        assert_eq!(result.delivered_count, 1);
        assert!(email_sender.sent_messages().is_empty());
        assert!(!delivery_log.is_claimed("event-1", "signer_turn_email"));
    }

    // ==================== handles判定テスト ====================

    #[test]
    fn test_strategy_handles_matrix() {
        let turn = SignerTurnStrategy::new(MockEmailSender::new(), String::new());
        let completion = CompletionStrategy::new(MockEmailSender::new(), String::new());
        let terminal = TerminalStrategy::new(MockEmailSender::new());
        let webhook = WebhookStrategy::new(MockWebhookSender::new());

        assert!(turn.handles(EVENT_SOURCE, "signer.turn_started"));
        assert!(!turn.handles(EVENT_SOURCE, "envelope.completed"));
        assert!(!turn.handles("aws.health", "signer.turn_started"));

        assert!(completion.handles(EVENT_SOURCE, "envelope.completed"));
        assert!(!completion.handles(EVENT_SOURCE, "envelope.sent"));

        assert!(terminal.handles(EVENT_SOURCE, "envelope.declined"));
        assert!(terminal.handles(EVENT_SOURCE, "envelope.voided"));
        assert!(terminal.handles(EVENT_SOURCE, "envelope.expired"));
        assert!(!terminal.handles(EVENT_SOURCE, "envelope.completed"));

        assert!(webhook.handles(EVENT_SOURCE, "envelope.sent"));
        assert!(webhook.handles(EVENT_SOURCE, "signer.signed"));
        assert!(!webhook.handles("aws.health", "envelope.sent"));
    }

    // エラー型の表示メッセージテスト
    #[test]
    fn test_strategy_error_display() {
        let error = StrategyError::MissingField("access_token".to_string());
        assert_eq!(
            error.to_string(),
            "event detail missing field: access_token"
        );

        let error = StrategyError::Email("failed to send email: down".to_string());
        assert_eq!(
            error.to_string(),
            "email delivery failed: failed to send email: down"
        );
    }

    #[test]
    fn test_dispatch_result_new_and_default() {
        let result = DispatchResult::new();
        assert_eq!(result, DispatchResult::default());
        assert_eq!(result.delivered_count, 0);
        assert_eq!(result.failed_count, 0);
    }
}
