//! CommandExecutor port - シェル実行の抽象化
//!
//! HTTP エンドポイントとポーリングワーカーはどちらもこの trait にだけ依存する。
//! テストでは呼び出し回数を数える実装に差し替える。

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{ExecutionResult, RelayError};

/// Runs one shell command.
///
/// A command that starts and exits non-zero is `Ok` with `success: false`;
/// only a process that could not be spawned is an `Err`
/// (`RelayError::Spawn`).
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, cwd: Option<&Path>)
    -> Result<ExecutionResult, RelayError>;
}
