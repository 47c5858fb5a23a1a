//! RelayConfig - 実行時設定
//!
//! CLI が引数/環境変数から組み立てて core に渡す。core 自身は環境変数を読まない。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::prober::DEFAULT_MAX_RETRIES;
use crate::app::workdir::DEFAULT_PROJECTS_ROOT;
use crate::impls::{DEFAULT_SHELL, MessageEncoding};

pub const DEFAULT_COMMAND_QUEUE: &str = "commandqueue";
pub const DEFAULT_RESPONSE_QUEUE: &str = "responsequeue";
pub const DEFAULT_PORT: u16 = 3000;

/// Which queue implementation backs the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Azure,
    /// Process-local queues; nothing is consumed from outside.
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(QueueBackend::Azure),
            "memory" | "inmem" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend '{other}' (expected azure or memory)")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("AZURE_STORAGE_CONNECTION_STRING is required for the azure queue backend")]
    MissingConnectionString,

    #[error("queue name must not be empty ({0})")]
    EmptyQueueName(&'static str),

    #[error("command timeout must be greater than zero")]
    ZeroTimeout,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub queue_backend: QueueBackend,
    /// Never logged; `Debug` shows only whether it is set.
    pub connection_string: Option<String>,
    pub command_queue: String,
    pub response_queue: String,
    pub message_encoding: MessageEncoding,
    pub port: u16,
    pub projects_dir: PathBuf,
    pub shell: String,
    /// Kill queued and HTTP commands after this many seconds (unset = no limit).
    pub command_timeout_secs: Option<u64>,
    pub probe_max_retries: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_backend: QueueBackend::default(),
            connection_string: None,
            command_queue: DEFAULT_COMMAND_QUEUE.to_string(),
            response_queue: DEFAULT_RESPONSE_QUEUE.to_string(),
            message_encoding: MessageEncoding::default(),
            port: DEFAULT_PORT,
            projects_dir: PathBuf::from(DEFAULT_PROJECTS_ROOT),
            shell: DEFAULT_SHELL.to_string(),
            command_timeout_secs: None,
            probe_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("queue_backend", &self.queue_backend)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("command_queue", &self.command_queue)
            .field("response_queue", &self.response_queue)
            .field("message_encoding", &self.message_encoding)
            .field("port", &self.port)
            .field("projects_dir", &self.projects_dir)
            .field("shell", &self.shell)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("probe_max_retries", &self.probe_max_retries)
            .finish()
    }
}

impl RelayConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_backend == QueueBackend::Azure
            && self
                .connection_string
                .as_deref()
                .is_none_or(|s| s.trim().is_empty())
        {
            return Err(ConfigError::MissingConnectionString);
        }
        if self.command_queue.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName("command"));
        }
        if self.response_queue.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName("response"));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}
