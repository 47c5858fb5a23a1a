//! MessageQueue port - コマンドキュー / レスポンスキュー（Azure Storage Queue または InMemory）
//!
//! ワーカーはキューの保存・複製には関与せず、以下の 4 操作だけを使う:
//! - `properties`: 到達確認（readiness probe）
//! - `receive`: 最大 1 件を visibility timeout 付きで受信
//! - `send`: レスポンスの送信
//! - `delete`: pop receipt による ack

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// QueueError はキュー操作のエラー
///
/// いずれも一時的なものとして扱い、呼び出し側の backoff で吸収する。
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("queue service returned HTTP {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("failed to decode queue response: {0}")]
    Decode(String),

    #[error("message not found: {0}")]
    NotFound(String),

    #[error("invalid queue configuration: {0}")]
    Config(String),
}

/// A message leased from a queue for one processing cycle.
///
/// `pop_receipt` is the ack token: it changes on every delivery, and only
/// the latest one can delete the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub pop_receipt: String,
    pub dequeue_count: u32,
    pub body: Vec<u8>,
}

impl QueueMessage {
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Metadata returned by a successful reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueProperties {
    pub name: String,
    pub approximate_message_count: Option<u64>,
}

/// MessageQueue はキュー 1 本へのクライアント
///
/// # Thread Safety
/// - `Send + Sync`（HTTP 側の health とワーカーから共有される）
#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn properties(&self) -> Result<QueueProperties, QueueError>;

    /// Receive at most one message, hiding it for `visibility_timeout`.
    async fn receive(&self, visibility_timeout: Duration)
    -> Result<Option<QueueMessage>, QueueError>;

    async fn send(&self, text: &str) -> Result<(), QueueError>;

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;
}
