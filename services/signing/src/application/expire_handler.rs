/// 有効期限スイープハンドラ
///
/// スケジュール起動で期限切れの封筒を検出し、Expiredに遷移させる。
/// 1件の失敗がバッチ全体を止めないよう、封筒ごとに処理して
/// 失敗はスキップとして数える。
/// 要件: 1.7, 4.1
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{DomainEvent, Envelope, OutboxRecord};
use crate::infrastructure::{EnvelopeRepository, EnvelopeRepositoryError, UpdateResult};

/// スイープのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpireSweepError {
    /// リポジトリエラー
    #[error("Repository error: {0}")]
    RepositoryError(String),

    /// イベントのシリアライズに失敗
    #[error("Event serialization error: {0}")]
    EventError(String),
}

impl From<EnvelopeRepositoryError> for ExpireSweepError {
    fn from(err: EnvelopeRepositoryError) -> Self {
        ExpireSweepError::RepositoryError(err.to_string())
    }
}

impl From<serde_json::Error> for ExpireSweepError {
    fn from(err: serde_json::Error) -> Self {
        ExpireSweepError::EventError(err.to_string())
    }
}

/// スイープの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpireSweepResult {
    /// Expiredに遷移させた封筒数
    pub expired_count: usize,
    /// スキップした封筒数（競合・失敗を含む）
    pub skipped_count: usize,
}

/// 期限切れ封筒のスイープを処理するハンドラ
pub struct ExpireSweepHandler<R>
where
    R: EnvelopeRepository,
{
    /// 封筒リポジトリ
    envelope_repo: R,
}

impl<R> ExpireSweepHandler<R>
where
    R: EnvelopeRepository,
{
    /// 新しいExpireSweepHandlerを作成
    pub fn new(envelope_repo: R) -> Self {
        Self { envelope_repo }
    }

    /// 期限切れスイープを実行
    ///
    /// # 処理フロー
    /// 1. 期限インデックスからnow以前に期限を迎えた送信済み封筒を取得
    /// 2. 封筒ごとにExpiredへ遷移し、envelope.expiredイベントを書き込み
    /// 3. 競合・失敗はスキップとして数え、処理を継続
    ///
    /// スケジュールと署名が競合した場合、条件付き書き込みが片方を
    /// 弾くので二重遷移にはならない。
    ///
    /// 要件: 1.7
    pub async fn handle(
        &self,
        now: i64,
        limit: u32,
    ) -> Result<ExpireSweepResult, ExpireSweepError> {
        let candidates = self.envelope_repo.query_expiring(now, limit).await?;
        info!(candidate_count = candidates.len(), "期限切れ候補を取得");

        let mut expired_count = 0;
        let mut skipped_count = 0;

        for mut envelope in candidates {
            match self.expire_one(&mut envelope, now).await {
                Ok(true) => expired_count += 1,
                Ok(false) => skipped_count += 1,
                Err(e) => {
                    warn!(
                        tenant_id = %envelope.tenant_id,
                        envelope_id = %envelope.id,
                        error = %e,
                        "期限切れ処理に失敗、スキップして継続"
                    );
                    skipped_count += 1;
                }
            }
        }

        info!(
            expired_count = expired_count,
            skipped_count = skipped_count,
            "期限切れスイープ完了"
        );

        Ok(ExpireSweepResult {
            expired_count,
            skipped_count,
        })
    }

    /// 1件の封筒を期限切れに遷移させる
    ///
    /// 遷移できた場合はOk(true)、対象外または競合はOk(false)。
    async fn expire_one(
        &self,
        envelope: &mut Envelope,
        now: i64,
    ) -> Result<bool, ExpireSweepError> {
        let prev_status = envelope.status;
        if let Err(e) = envelope.expire(now) {
            // クエリ後に署名が完了した等、既に対象外になった封筒
            debug!(
                envelope_id = %envelope.id,
                reason = %e,
                "期限切れ対象外のためスキップ"
            );
            return Ok(false);
        }

        let event = DomainEvent::envelope_expired(envelope);
        let records = vec![OutboxRecord::new(&event, now)?];

        match self
            .envelope_repo
            .update_with_outbox(envelope, prev_status, &records)
            .await?
        {
            UpdateResult::Updated => {
                info!(
                    tenant_id = %envelope.tenant_id,
                    envelope_id = %envelope.id,
                    "封筒を期限切れに遷移"
                );
                Ok(true)
            }
            UpdateResult::Conflict => {
                debug!(
                    envelope_id = %envelope.id,
                    "並行更新と競合、スキップ"
                );
                Ok(false)
            }
        }
    }
}
