//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 起動順序
//! 1. キュークライアントを作る（`build()`）
//! 2. QueueProber でキューの疎通を確認（失敗しても続行）
//! 3. HTTP サーバを起動
//! 4. PollingWorker を起動
//!
//! 停止時は HTTP を drain してからワーカーをサイクル境界で止める。
//!
//! # 使用例
//! ```ignore
//! let app = AppBuilder::new(config).build()?;
//! app.run(shutdown_signal()).await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::app::backoff::BackoffPolicy;
use crate::app::http::{self, HttpState};
use crate::app::prober::{QueueProber, Readiness};
use crate::app::status::ServiceStatus;
use crate::app::worker_loop::{PollingWorker, WorkerSettings};
use crate::app::workdir::WorkdirResolver;
use crate::config::{ConfigError, QueueBackend, RelayConfig};
use crate::domain::RelayError;
use crate::impls::{AzureQueueClient, InMemoryQueue, ShellExecutor, StorageAccount};
use crate::ports::{CommandExecutor, MessageQueue, QueueError};

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("queue client: {0}")]
    Queue(#[from] QueueError),
}

/// Wires config, queues and executor into an [`App`].
///
/// Queues and executor may be injected (tests, embedding); otherwise they are
/// built from the config.
pub struct AppBuilder {
    config: RelayConfig,
    command_queue: Option<Arc<dyn MessageQueue>>,
    response_queue: Option<Arc<dyn MessageQueue>>,
    executor: Option<Arc<dyn CommandExecutor>>,
    worker_settings: WorkerSettings,
    probe_policy: BackoffPolicy,
}

impl AppBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            command_queue: None,
            response_queue: None,
            executor: None,
            worker_settings: WorkerSettings::default(),
            probe_policy: BackoffPolicy::probe_default(),
        }
    }

    pub fn queues(
        mut self,
        command_queue: Arc<dyn MessageQueue>,
        response_queue: Arc<dyn MessageQueue>,
    ) -> Self {
        self.command_queue = Some(command_queue);
        self.response_queue = Some(response_queue);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn worker_settings(mut self, settings: WorkerSettings) -> Self {
        self.worker_settings = settings;
        self
    }

    pub fn probe_policy(mut self, policy: BackoffPolicy) -> Self {
        self.probe_policy = policy;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let config = self.config;
        if self.command_queue.is_none() || self.response_queue.is_none() {
            config.validate()?;
        }

        let (command_queue, response_queue, storage_account) =
            match (self.command_queue, self.response_queue) {
                (Some(commands), Some(responses)) => (commands, responses, None),
                _ => queues_from_config(&config)?,
            };

        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(
                ShellExecutor::new(config.shell.clone()).with_timeout(config.command_timeout()),
            )
        });

        Ok(App {
            workdir: WorkdirResolver::new(config.projects_dir.clone()),
            status: Arc::new(ServiceStatus::new()),
            command_queue,
            response_queue,
            executor,
            storage_account,
            worker_settings: self.worker_settings,
            probe_policy: self.probe_policy,
            config,
        })
    }
}

type QueuePair = (Arc<dyn MessageQueue>, Arc<dyn MessageQueue>, Option<String>);

fn queues_from_config(config: &RelayConfig) -> Result<QueuePair, BuildError> {
    match config.queue_backend {
        QueueBackend::Memory => Ok((
            Arc::new(InMemoryQueue::new(config.command_queue.clone())),
            Arc::new(InMemoryQueue::new(config.response_queue.clone())),
            None,
        )),
        QueueBackend::Azure => {
            let raw = config
                .connection_string
                .as_deref()
                .ok_or(ConfigError::MissingConnectionString)?;
            let account = StorageAccount::from_connection_string(raw)?;
            let storage_account = account.account_name();
            let commands = AzureQueueClient::new(
                account.clone(),
                config.command_queue.clone(),
                config.message_encoding,
            )?;
            let responses = AzureQueueClient::new(
                account,
                config.response_queue.clone(),
                config.message_encoding,
            )?;
            Ok((Arc::new(commands), Arc::new(responses), storage_account))
        }
    }
}

/// App はアプリケーションのランタイム
///
/// キュー・実行器・共有ステータスを明示的に持ち、HTTP とワーカーに渡す。
pub struct App {
    config: RelayConfig,
    command_queue: Arc<dyn MessageQueue>,
    response_queue: Arc<dyn MessageQueue>,
    executor: Arc<dyn CommandExecutor>,
    workdir: WorkdirResolver,
    status: Arc<ServiceStatus>,
    storage_account: Option<String>,
    worker_settings: WorkerSettings,
    probe_policy: BackoffPolicy,
}

impl App {
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn status(&self) -> Arc<ServiceStatus> {
        Arc::clone(&self.status)
    }

    pub fn storage_account(&self) -> Option<&str> {
        self.storage_account.as_deref()
    }

    pub fn prober(&self) -> QueueProber {
        QueueProber::new(
            Arc::clone(&self.command_queue),
            Arc::clone(&self.response_queue),
            Arc::clone(&self.status),
        )
        .with_policy(self.probe_policy.clone())
        .with_max_retries(self.config.probe_max_retries)
    }

    pub fn router(&self) -> Router {
        http::router(HttpState::new(
            Arc::clone(&self.executor),
            self.workdir.clone(),
            Arc::clone(&self.status),
            self.config.shell.clone(),
            self.storage_account.clone(),
        ))
    }

    pub fn worker(&self) -> PollingWorker {
        PollingWorker::new(
            Arc::clone(&self.command_queue),
            Arc::clone(&self.response_queue),
            Arc::clone(&self.executor),
            self.workdir.clone(),
            Arc::clone(&self.status),
        )
        .with_settings(self.worker_settings.clone())
    }

    /// Bind `0.0.0.0:{port}` and run until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<Readiness, RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let readiness = self.prober().run().await;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Startup(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener, shutdown).await?;
        Ok(readiness)
    }

    /// Like [`App::run`] but on a caller-provided listener.
    pub async fn run_with_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<Readiness, RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let readiness = self.prober().run().await;
        self.serve(listener, shutdown).await?;
        Ok(readiness)
    }

    async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server = tokio::spawn(http::serve(listener, self.router(), shutdown));
        let worker = self.worker().spawn();
        info!(
            queue_verified = self.status.queues_verified(),
            "command relay running"
        );

        let served = server.await;
        worker.shutdown_and_join().await;

        match served {
            Ok(Ok(())) => {
                info!("command relay stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(RelayError::Startup(format!("http server: {err}"))),
            Err(err) => {
                error!(error = %err, "http server task failed");
                Err(RelayError::Startup(format!("http server task: {err}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> RelayConfig {
        RelayConfig {
            queue_backend: QueueBackend::Memory,
            ..RelayConfig::default()
        }
    }

    #[test]
    fn memory_backend_builds() {
        let app = AppBuilder::new(memory_config()).build().unwrap();
        assert_eq!(app.storage_account(), None);
        assert!(!app.status().queues_verified());
    }

    #[test]
    fn azure_without_connection_string_fails() {
        let result = AppBuilder::new(RelayConfig::default()).build();
        assert!(matches!(
            result,
            Err(BuildError::Config(ConfigError::MissingConnectionString))
        ));
    }

    #[test]
    fn azure_backend_exposes_account_name() {
        let config = RelayConfig {
            connection_string: Some(
                "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net"
                    .into(),
            ),
            ..RelayConfig::default()
        };
        let app = AppBuilder::new(config).build().unwrap();
        assert_eq!(app.storage_account(), Some("acme"));
    }

    #[test]
    fn malformed_connection_string_fails() {
        let config = RelayConfig {
            connection_string: Some("garbage".into()),
            ..RelayConfig::default()
        };
        assert!(matches!(
            AppBuilder::new(config).build(),
            Err(BuildError::Queue(QueueError::Config(_)))
        ));
    }

    #[test]
    fn injected_queues_skip_connection_string() {
        let app = AppBuilder::new(RelayConfig::default())
            .queues(
                Arc::new(InMemoryQueue::new("c")),
                Arc::new(InMemoryQueue::new("r")),
            )
            .build();
        assert!(app.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let app = AppBuilder::new(memory_config()).build().unwrap();
        let status = app.status();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let readiness = app
            .run_with_listener(listener, async {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            })
            .await
            .unwrap();

        assert!(readiness.ready);
        assert!(status.queues_verified());
    }
}
