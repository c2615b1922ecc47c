// アプリケーション層モジュール
pub mod completion;
pub mod decline_handler;
pub mod expire_handler;
pub mod outbox_relay;
pub mod send_handler;
pub mod sign_handler;
pub mod view_handler;
pub mod void_handler;

// 再エクスポート
pub use completion::{CompletionError, seal_document};
pub use decline_handler::{DeclineEnvelopeHandler, DeclineError, DeclineRequest, DeclineResponse};
pub use expire_handler::{ExpireSweepError, ExpireSweepHandler, ExpireSweepResult};
pub use outbox_relay::{OutboxRelayHandler, RelayResult};
pub use send_handler::{
    SendEnvelopeHandler, SendEnvelopeRequest, SendEnvelopeResponse, SendError, SignerRequest,
    SignerTokenInfo,
};
pub use sign_handler::{SignEnvelopeHandler, SignError, SignRequest, SignResponse};
pub use view_handler::{ViewDocumentHandler, ViewError, ViewRequest, ViewResponse};
pub use void_handler::{VoidEnvelopeHandler, VoidError, VoidRequest, VoidResponse};
