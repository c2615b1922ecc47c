// 封筒集約
//
// 署名ワークフローの中心となる集約。封筒のライフサイクル遷移と
// 署名者の順序制御をここで判定する。外部依存を持たない純粋なドメインロジック。
// 要件: 1.1-1.6, 2.1-2.4

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::envelope_status::{EnvelopeStatus, SignerStatus, SigningOrder};

/// 封筒操作のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    /// 終端状態の封筒は操作を受け付けない
    #[error("envelope is in terminal status: {0}")]
    TerminalStatus(EnvelopeStatus),
    /// 送信はドラフト状態でのみ可能
    #[error("envelope must be draft to send, current status: {0}")]
    NotDraft(EnvelopeStatus),
    /// 署名者操作は送信済み状態でのみ可能
    #[error("envelope must be sent, current status: {0}")]
    NotSent(EnvelopeStatus),
    /// 署名者が1人もいない
    #[error("envelope has no signers")]
    NoSigners,
    /// 対象文書が指定されていない
    #[error("envelope has no document")]
    MissingDocument,
    /// 同一メールアドレスの署名者が重複
    #[error("duplicate signer email: {0}")]
    DuplicateSigner(String),
    /// routing_orderは1以上
    #[error("routing order must be 1 or greater, got {0}")]
    InvalidRoutingOrder(u32),
    /// 指定された署名者が存在しない
    #[error("unknown signer: {0}")]
    UnknownSigner(String),
    /// 署名済みの署名者による再操作
    #[error("signer has already signed: {0}")]
    AlreadySigned(String),
    /// 順番が回っていない署名者による操作
    #[error("not this signer's turn: {0}")]
    NotSignerTurn(String),
    /// 未署名の署名者が残っている状態での完了
    #[error("cannot complete, {0} signer(s) have not signed")]
    SignersRemaining(usize),
    /// 有効期限がまだ到来していない
    #[error("expiry deadline has not passed")]
    NotExpired,
}

/// 署名記録後に呼び出し側が取るべきアクション
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureOutcome {
    /// まだ署名者が残っている。next_turnには新たに順番が始まる署名者ID
    /// （逐次進行で次グループに進んだ場合のみ非空）
    Progressed { next_turn: Vec<String> },
    /// 全署名者が署名済み。完了処理（署名埋め込み）に進む
    ReadyToComplete,
}

/// 封筒内の署名者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signer {
    pub id: String,
    pub email: String,
    pub name: String,
    /// 1始まり。同値の署名者は並行グループとして扱う（要件 2.2）
    pub routing_order: u32,
    pub status: SignerStatus,
    /// アクセストークンのSHA-256ダイジェスト。トークン自体は保存しない（要件 7.2）
    pub token_digest: Option<String>,
    pub signed_at: Option<i64>,
    pub declined_reason: Option<String>,
}

impl Signer {
    pub fn new(id: String, email: String, name: String, routing_order: u32) -> Self {
        Signer {
            id,
            email,
            name,
            routing_order,
            status: SignerStatus::Pending,
            token_digest: None,
            signed_at: None,
            declined_reason: None,
        }
    }

    /// 署名または拒否を終えているか
    pub fn has_acted(&self) -> bool {
        matches!(self.status, SignerStatus::Signed | SignerStatus::Declined)
    }
}

/// 封筒作成時の入力
#[derive(Debug, Clone)]
pub struct NewEnvelope {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub sender_email: String,
    pub document_key: String,
    pub signing_order: SigningOrder,
    pub signers: Vec<Signer>,
}

/// 封筒集約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub status: EnvelopeStatus,
    pub signing_order: SigningOrder,
    /// 元文書のS3キー
    pub document_key: String,
    /// 署名埋め込み済み文書のS3キー（完了後のみ）
    pub completed_document_key: Option<String>,
    pub sender_email: String,
    /// 送信時に設定される有効期限（epoch秒）。送信前はNone
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub signers: Vec<Signer>,
}

impl Envelope {
    /// 封筒を作成してドラフト状態で返す（要件 1.1）
    ///
    /// 検証内容:
    /// - 署名者が1人以上
    /// - 文書キーが空でない
    /// - routing_orderが1以上
    /// - メールアドレスの重複なし
    pub fn create(new: NewEnvelope, now: i64) -> Result<Envelope, EnvelopeError> {
        if new.signers.is_empty() {
            return Err(EnvelopeError::NoSigners);
        }
        if new.document_key.is_empty() {
            return Err(EnvelopeError::MissingDocument);
        }
        for (i, signer) in new.signers.iter().enumerate() {
            if signer.routing_order == 0 {
                return Err(EnvelopeError::InvalidRoutingOrder(0));
            }
            if new.signers[..i].iter().any(|s| s.email == signer.email) {
                return Err(EnvelopeError::DuplicateSigner(signer.email.clone()));
            }
        }

        Ok(Envelope {
            id: new.id,
            tenant_id: new.tenant_id,
            title: new.title,
            status: EnvelopeStatus::Draft,
            signing_order: new.signing_order,
            document_key: new.document_key,
            completed_document_key: None,
            sender_email: new.sender_email,
            expires_at: None,
            created_at: now,
            updated_at: now,
            signers: new.signers,
        })
    }

    /// テナントスコープ付きのパーティションキー（要件 7.1）
    pub fn partition_key(&self) -> String {
        Self::partition_key_for(&self.tenant_id, &self.id)
    }

    /// テナントIDと封筒IDからパーティションキーを組み立てる
    pub fn partition_key_for(tenant_id: &str, envelope_id: &str) -> String {
        format!("TENANT#{tenant_id}#ENV#{envelope_id}")
    }

    /// 封筒を送信する（要件 1.3, 2.2）
    ///
    /// ドラフト状態からのみ遷移可能。有効期限を設定し、
    /// 最初に順番が始まる署名者のIDを返す。
    /// 呼び出し側はそれらにトークンを発行してstart_turnを呼ぶ。
    pub fn send(&mut self, expires_at: i64, now: i64) -> Result<Vec<String>, EnvelopeError> {
        if self.status != EnvelopeStatus::Draft {
            return Err(EnvelopeError::NotDraft(self.status));
        }
        self.status = EnvelopeStatus::Sent;
        self.expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(self
            .current_signers()
            .into_iter()
            .map(|s| s.id.clone())
            .collect())
    }

    /// 現在順番が回っている署名者（要件 2.2, 2.3）
    ///
    /// 並行モードでは未完了の全署名者。逐次モードでは未完了の署名者を含む
    /// 最小routing_orderグループの未完了メンバー。
    /// 送信済み以外の状態では空を返す。
    pub fn current_signers(&self) -> Vec<&Signer> {
        if self.status != EnvelopeStatus::Sent {
            return vec![];
        }
        let waiting = self.signers.iter().filter(|s| !s.has_acted());
        match self.signing_order {
            SigningOrder::Parallel => waiting.collect(),
            SigningOrder::Sequential => {
                let Some(order) = self
                    .signers
                    .iter()
                    .filter(|s| !s.has_acted())
                    .map(|s| s.routing_order)
                    .min()
                else {
                    return vec![];
                };
                waiting.filter(|s| s.routing_order == order).collect()
            }
        }
    }

    /// 署名者の順番開始を記録し、アクセストークンのダイジェストを保存する（要件 2.3, 7.2）
    ///
    /// 対象はcurrent_signersに含まれる署名者のみ。
    /// 既にNotifiedTurnの署名者に対してはダイジェストを差し替える
    /// （トークン再発行）。
    pub fn start_turn(
        &mut self,
        signer_id: &str,
        token_digest: String,
        now: i64,
    ) -> Result<(), EnvelopeError> {
        if self.status.is_terminal() {
            return Err(EnvelopeError::TerminalStatus(self.status));
        }
        if self.status != EnvelopeStatus::Sent {
            return Err(EnvelopeError::NotSent(self.status));
        }
        if !self.current_signers().iter().any(|s| s.id == signer_id) {
            // 存在しない署名者と順番外の署名者を区別してエラーを返す
            return match self.find_signer(signer_id) {
                Some(_) => Err(EnvelopeError::NotSignerTurn(signer_id.to_string())),
                None => Err(EnvelopeError::UnknownSigner(signer_id.to_string())),
            };
        }
        let signer = self.find_signer_mut(signer_id)?;
        signer.status = SignerStatus::NotifiedTurn;
        signer.token_digest = Some(token_digest);
        self.updated_at = now;
        Ok(())
    }

    /// 署名を記録する（要件 1.4, 2.4）
    ///
    /// 署名済みの署名者による再署名はエラー（冪等な成功にはしない）。
    /// 全署名者が署名済みになった場合はReadyToCompleteを返し、
    /// 呼び出し側が完了処理に進む。
    pub fn record_signature(
        &mut self,
        signer_id: &str,
        now: i64,
    ) -> Result<SignatureOutcome, EnvelopeError> {
        if self.status.is_terminal() {
            return Err(EnvelopeError::TerminalStatus(self.status));
        }
        if self.status != EnvelopeStatus::Sent {
            return Err(EnvelopeError::NotSent(self.status));
        }
        let signer = self.find_signer_mut(signer_id)?;
        match signer.status {
            SignerStatus::Signed => {
                return Err(EnvelopeError::AlreadySigned(signer_id.to_string()));
            }
            SignerStatus::NotifiedTurn => {}
            SignerStatus::Pending | SignerStatus::Declined => {
                return Err(EnvelopeError::NotSignerTurn(signer_id.to_string()));
            }
        }
        signer.status = SignerStatus::Signed;
        signer.signed_at = Some(now);
        // トークンは使い切り。署名後はダイジェストを破棄する
        signer.token_digest = None;
        self.updated_at = now;

        if self.signers.iter().all(|s| s.status == SignerStatus::Signed) {
            return Ok(SignatureOutcome::ReadyToComplete);
        }
        // 新たに順番が始まる署名者 = 現グループのうちまだ通知されていない署名者。
        // 並行モードや同一グループ内に未署名者が残る場合は空になる
        let next_turn = self
            .current_signers()
            .into_iter()
            .filter(|s| s.status == SignerStatus::Pending)
            .map(|s| s.id.clone())
            .collect();
        Ok(SignatureOutcome::Progressed { next_turn })
    }

    /// 署名を拒否する（要件 1.5）
    ///
    /// いずれかの署名者が拒否した時点で封筒全体がDeclinedの終端状態になる。
    pub fn decline(
        &mut self,
        signer_id: &str,
        reason: String,
        now: i64,
    ) -> Result<(), EnvelopeError> {
        if self.status.is_terminal() {
            return Err(EnvelopeError::TerminalStatus(self.status));
        }
        if self.status != EnvelopeStatus::Sent {
            return Err(EnvelopeError::NotSent(self.status));
        }
        let signer = self.find_signer_mut(signer_id)?;
        match signer.status {
            SignerStatus::Signed => {
                return Err(EnvelopeError::AlreadySigned(signer_id.to_string()));
            }
            SignerStatus::NotifiedTurn => {}
            SignerStatus::Pending | SignerStatus::Declined => {
                return Err(EnvelopeError::NotSignerTurn(signer_id.to_string()));
            }
        }
        signer.status = SignerStatus::Declined;
        signer.declined_reason = Some(reason);
        signer.token_digest = None;
        self.status = EnvelopeStatus::Declined;
        self.updated_at = now;
        self.revoke_outstanding_tokens();
        Ok(())
    }

    /// 封筒を無効化する（要件 1.6）
    ///
    /// ドラフトまたは送信済みから遷移可能。未使用トークンはすべて失効する。
    pub fn void(&mut self, now: i64) -> Result<(), EnvelopeError> {
        if self.status.is_terminal() {
            return Err(EnvelopeError::TerminalStatus(self.status));
        }
        self.status = EnvelopeStatus::Voided;
        self.updated_at = now;
        self.revoke_outstanding_tokens();
        Ok(())
    }

    /// 有効期限切れを記録する（要件 1.7）
    ///
    /// 境界時刻ちょうど（now == expires_at）は期限切れとして扱う。
    pub fn expire(&mut self, now: i64) -> Result<(), EnvelopeError> {
        if self.status.is_terminal() {
            return Err(EnvelopeError::TerminalStatus(self.status));
        }
        if self.status != EnvelopeStatus::Sent {
            return Err(EnvelopeError::NotSent(self.status));
        }
        if self.expires_at.is_none_or(|deadline| now < deadline) {
            return Err(EnvelopeError::NotExpired);
        }
        self.status = EnvelopeStatus::Expired;
        self.updated_at = now;
        self.revoke_outstanding_tokens();
        Ok(())
    }

    /// 完了を記録する（要件 1.4, 3.7）
    ///
    /// 全署名者の署名後、署名埋め込み済み文書のキーとともに呼ばれる。
    pub fn complete(&mut self, completed_key: String, now: i64) -> Result<(), EnvelopeError> {
        if self.status.is_terminal() {
            return Err(EnvelopeError::TerminalStatus(self.status));
        }
        if self.status != EnvelopeStatus::Sent {
            return Err(EnvelopeError::NotSent(self.status));
        }
        let remaining = self
            .signers
            .iter()
            .filter(|s| s.status != SignerStatus::Signed)
            .count();
        if remaining > 0 {
            return Err(EnvelopeError::SignersRemaining(remaining));
        }
        self.status = EnvelopeStatus::Completed;
        self.completed_document_key = Some(completed_key);
        self.updated_at = now;
        Ok(())
    }

    pub fn find_signer(&self, signer_id: &str) -> Option<&Signer> {
        self.signers.iter().find(|s| s.id == signer_id)
    }

    fn find_signer_mut(&mut self, signer_id: &str) -> Result<&mut Signer, EnvelopeError> {
        self.signers
            .iter_mut()
            .find(|s| s.id == signer_id)
            .ok_or_else(|| EnvelopeError::UnknownSigner(signer_id.to_string()))
    }

    // 終端状態への遷移時に未使用トークンをまとめて失効させる
    fn revoke_outstanding_tokens(&mut self) {
        for signer in &mut self.signers {
            if !signer.has_acted() {
                signer.token_digest = None;
            }
        }
    }
}
