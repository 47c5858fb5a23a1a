//! InMemoryQueue - 開発用・テスト用のメッセージキュー
//!
//! # 実装詳細
//! - `VecDeque<StoredMessage>` を `tokio::sync::Mutex` で保護
//! - receive したメッセージは visibility timeout の間だけ不可視になり、
//!   delete されなければ期限後に再配送される（at-least-once）
//! - pop receipt は受信のたびに更新され、古い receipt では delete できない
//! - `fail_next(n)` で接続障害を注入できる（backoff のテスト用）

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use ulid::Ulid;

use crate::ports::{MessageQueue, QueueError, QueueMessage, QueueProperties};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    pop_receipt: Option<String>,
    dequeue_count: u32,
    visible_at: Instant,
    body: Vec<u8>,
}

pub struct InMemoryQueue {
    name: String,
    messages: Mutex<VecDeque<StoredMessage>>,
    /// 残りの注入エラー数
    failures: AtomicU32,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
            failures: AtomicU32::new(0),
        }
    }

    /// Enqueue a message as a producer would; returns its id.
    pub async fn push(&self, text: &str) -> String {
        let message_id = Ulid::new().to_string();
        let mut messages = self.messages.lock().await;
        messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            pop_receipt: None,
            dequeue_count: 0,
            visible_at: Instant::now(),
            body: text.as_bytes().to_vec(),
        });
        message_id
    }

    /// Number of stored messages, visible or not.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bodies of every stored message in enqueue order.
    pub async fn bodies(&self) -> Vec<String> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| String::from_utf8_lossy(&m.body).into_owned())
            .collect()
    }

    /// Make the next `n` operations fail with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<(), QueueError> {
        let took = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match took {
            Ok(_) => Err(QueueError::Transport(format!(
                "{}: injected connectivity failure",
                self.name
            ))),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn properties(&self) -> Result<QueueProperties, QueueError> {
        self.injected_failure()?;
        Ok(QueueProperties {
            name: self.name.clone(),
            approximate_message_count: Some(self.len().await as u64),
        })
    }

    async fn receive(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        self.injected_failure()?;
        let now = Instant::now();
        let mut messages = self.messages.lock().await;
        let Some(stored) = messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        let pop_receipt = Ulid::new().to_string();
        stored.pop_receipt = Some(pop_receipt.clone());
        stored.dequeue_count += 1;
        stored.visible_at = now + visibility_timeout;

        Ok(Some(QueueMessage {
            message_id: stored.message_id.clone(),
            pop_receipt,
            dequeue_count: stored.dequeue_count,
            body: stored.body.clone(),
        }))
    }

    async fn send(&self, text: &str) -> Result<(), QueueError> {
        self.injected_failure()?;
        self.push(text).await;
        Ok(())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.injected_failure()?;
        let mut messages = self.messages.lock().await;
        let position = messages.iter().position(|m| {
            m.message_id == message.message_id
                && m.pop_receipt.as_deref() == Some(message.pop_receipt.as_str())
        });
        match position {
            Some(index) => {
                messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::NotFound(message.message_id.clone())),
        }
    }
}
