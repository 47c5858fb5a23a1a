//! PollingWorker - コマンドキューの消費ループ
//!
//! # フロー
//! 1. Polling: コマンドキューから最大 1 件 receive（visibility timeout 付き）
//! 2. Processing: body を `CommandPayload` として parse → 作業ディレクトリ解決 → 実行
//! 3. Responding: レスポンスキューへ送信 → 元メッセージを delete
//!
//! 1 サイクルで処理するのは 1 件だけ。メッセージ N の delete が終わるまで
//! N+1 は receive しない。
//!
//! # エラー時
//! - キュー操作の失敗は `BackoffState` に記録し、ErrorBackoff / EscalatedBackoff
//!   の待ち状態に入る。プロセスは落とさない
//! - parse できない body は実行せずに delete する。`message_id` が取り出せる
//!   場合だけ `"Bad JSON"` の失敗レスポンスを返す

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::backoff::BackoffState;
use crate::app::status::ServiceStatus;
use crate::app::workdir::WorkdirResolver;
use crate::domain::{CommandPayload, ExecutionResult, ResponseMessage};
use crate::ports::{CommandExecutor, MessageQueue, QueueError, QueueMessage};

pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Error text sent back for a body that is not a valid command payload.
pub const BAD_JSON: &str = "Bad JSON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Wait after a poll that found no message.
    pub idle_delay: Duration,

    /// How long a received message stays invisible to other consumers.
    pub visibility_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            idle_delay: DEFAULT_IDLE_DELAY,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

/// Where the worker is in its cycle.
///
/// `Idle`, `ErrorBackoff` and `EscalatedBackoff` are waiting states: the
/// loop sleeps for the carried delay and then re-enters `Polling`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Polling,
    Processing(QueueMessage),
    Responding {
        message: QueueMessage,
        response: Option<ResponseMessage>,
    },
    Idle(Duration),
    ErrorBackoff(Duration),
    EscalatedBackoff(Duration),
}

impl WorkerState {
    /// Delay before the next poll, for waiting states.
    pub fn wait(&self) -> Option<Duration> {
        match self {
            WorkerState::Idle(d)
            | WorkerState::ErrorBackoff(d)
            | WorkerState::EscalatedBackoff(d) => Some(*d),
            _ => None,
        }
    }
}

pub struct PollingWorker {
    command_queue: Arc<dyn MessageQueue>,
    response_queue: Arc<dyn MessageQueue>,
    executor: Arc<dyn CommandExecutor>,
    workdir: WorkdirResolver,
    status: Arc<ServiceStatus>,
    settings: WorkerSettings,
    backoff: BackoffState,
}

impl PollingWorker {
    pub fn new(
        command_queue: Arc<dyn MessageQueue>,
        response_queue: Arc<dyn MessageQueue>,
        executor: Arc<dyn CommandExecutor>,
        workdir: WorkdirResolver,
        status: Arc<ServiceStatus>,
    ) -> Self {
        Self {
            command_queue,
            response_queue,
            executor,
            workdir,
            status,
            settings: WorkerSettings::default(),
            backoff: BackoffState::polling_default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffState) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.backoff.consecutive_errors()
    }

    /// Run one cycle from `Polling` and return the state the loop re-arms with.
    ///
    /// The result is a waiting state, or `Polling` when a message was handled
    /// cleanly and the queue should be polled again right away.
    pub async fn run_once(&mut self) -> WorkerState {
        let mut state = self.step(WorkerState::Polling).await;
        loop {
            match state {
                WorkerState::Processing(_) | WorkerState::Responding { .. } => {
                    state = self.step(state).await;
                }
                settled => return settled,
            }
        }
    }

    async fn step(&mut self, state: WorkerState) -> WorkerState {
        match state {
            WorkerState::Polling => self.poll().await,
            WorkerState::Processing(message) => self.process(message).await,
            WorkerState::Responding { message, response } => {
                self.respond(message, response).await
            }
            waiting => waiting,
        }
    }

    async fn poll(&mut self) -> WorkerState {
        debug!(queue = self.command_queue.name(), "polling for commands");
        self.status.record_poll(Utc::now());

        match self.command_queue.receive(self.settings.visibility_timeout).await {
            Ok(Some(message)) => {
                self.reset_errors();
                info!(
                    message_id = %message.message_id,
                    dequeue_count = message.dequeue_count,
                    "message received"
                );
                WorkerState::Processing(message)
            }
            Ok(None) => {
                self.reset_errors();
                debug!("no messages, waiting");
                WorkerState::Idle(self.settings.idle_delay)
            }
            Err(err) => self.fail(&err),
        }
    }

    async fn process(&mut self, message: QueueMessage) -> WorkerState {
        let payload = match CommandPayload::parse(&message.body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    message_id = %message.message_id,
                    kind = ?err.kind(),
                    error = %err,
                    "invalid command payload"
                );
                let response = CommandPayload::recover_message_id(&message.body).map(|id| {
                    ResponseMessage::from_result(id, ExecutionResult::rejected(BAD_JSON))
                });
                return WorkerState::Responding { message, response };
            }
        };

        let cwd = self.workdir.resolve(payload.project_name.as_deref());
        info!(
            message_id = %payload.message_id,
            command = %payload.command,
            cwd = ?cwd,
            "executing queued command"
        );

        let result = match self.executor.execute(&payload.command, cwd.as_deref()).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    message_id = %payload.message_id,
                    kind = ?err.kind(),
                    error = %err,
                    "command could not start"
                );
                ExecutionResult::spawn_failed(err.to_string())
            }
        };
        info!(
            message_id = %payload.message_id,
            success = result.success,
            "command finished"
        );

        WorkerState::Responding {
            message,
            response: Some(ResponseMessage::from_result(payload.message_id, result)),
        }
    }

    /// Send the response (if any), then delete the message regardless.
    async fn respond(
        &mut self,
        message: QueueMessage,
        response: Option<ResponseMessage>,
    ) -> WorkerState {
        let mut failure: Option<QueueError> = None;

        if let Some(response) = response {
            match self.response_queue.send(&response.to_json()).await {
                Ok(()) => info!(message_id = %response.message_id, "response sent"),
                Err(err) => {
                    error!(message_id = %response.message_id, error = %err, "response send failed");
                    failure = Some(err);
                }
            }
        }

        match self.command_queue.delete(&message).await {
            Ok(()) => {
                debug!(message_id = %message.message_id, "message deleted");
                self.status.record_processed();
            }
            // lease は切れて別の consumer に渡った。キューには到達できている
            Err(QueueError::NotFound(reason)) => {
                warn!(
                    message_id = %message.message_id,
                    reason = %reason,
                    "message already gone or re-leased; not deleted"
                );
            }
            Err(err) => {
                error!(message_id = %message.message_id, error = %err, "message delete failed");
                failure.get_or_insert(err);
            }
        }

        match failure {
            Some(err) => self.fail(&err),
            None => WorkerState::Polling,
        }
    }

    fn fail(&mut self, err: &QueueError) -> WorkerState {
        let delay = self.backoff.record_failure();
        let consecutive_errors = self.backoff.consecutive_errors();
        self.status.set_consecutive_errors(consecutive_errors);

        if self.backoff.is_escalated() {
            error!(
                consecutive_errors,
                error = %err,
                ?delay,
                "too many consecutive queue errors; polling with long delay"
            );
            WorkerState::EscalatedBackoff(delay)
        } else {
            warn!(consecutive_errors, error = %err, ?delay, "queue error; backing off");
            WorkerState::ErrorBackoff(delay)
        }
    }

    fn reset_errors(&mut self) {
        self.backoff.record_success();
        self.status.set_consecutive_errors(0);
    }

    /// Drive cycles until `shutdown` flips to true or its sender is dropped.
    ///
    /// Shutdown is only observed between cycles and during waits, so a
    /// running command always finishes and its message is answered.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = self.command_queue.name(), "starting queue polling");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = self.run_once().await;
            let Some(delay) = next.wait() else {
                continue;
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("queue polling stopped");
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle { shutdown_tx, join }
    }
}

/// Handle to a spawned worker.
/// - `request_shutdown()` で次のサイクル境界で止まる
/// - `shutdown_and_join()` で停止を待てる
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "worker task panicked");
        }
    }
}
