//! cmdrelay-core
//!
//! Core building blocks for the command relay: a worker that runs shell
//! commands submitted over HTTP or through a message queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（CommandRequest, CommandPayload, ExecutionResult, ResponseMessage, errors）
//! - **ports**: 抽象化レイヤー（MessageQueue, CommandExecutor）
//! - **impls**: 実装（ShellExecutor, AzureQueueClient, InMemoryQueue）
//! - **app**: アプリケーションロジック（builder, prober, worker_loop, http, backoff, status）
//! - **config**: 実行時設定（RelayConfig）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{App, AppBuilder};
pub use crate::config::{QueueBackend, RelayConfig};
