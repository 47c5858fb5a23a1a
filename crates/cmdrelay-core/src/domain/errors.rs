//! Errors - エラー型と分類
//!
//! リクエスト単位・メッセージ単位の失敗はすべて構造化された結果に変換される。
//! プロセスを止めてよいのは起動時のシェル確認（`ErrorKind::Startup`）だけ。

use thiserror::Error;

use crate::ports::QueueError;

/// ErrorKind は失敗の運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 入力の不備（command がない）
    Validation,
    /// キューメッセージの body が読めない
    Payload,
    /// コマンドが非ゼロで終了した
    Execution,
    /// プロセスを起動できなかった
    Spawn,
    /// キューに到達できない（一時的、backoff で吸収する）
    QueueConnectivity,
    /// 起動時の致命的エラー
    Startup,
}

impl ErrorKind {
    /// Only startup failures are allowed to terminate the process.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Startup)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("command required")]
    MissingCommand,

    #[error("Bad JSON: {0}")]
    BadPayload(String),

    /// Non-zero exit; carries the reported error text (normally stderr).
    #[error("{0}")]
    CommandFailed(String),

    #[error("{0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("startup failed: {0}")]
    Startup(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::MissingCommand => ErrorKind::Validation,
            RelayError::BadPayload(_) => ErrorKind::Payload,
            RelayError::CommandFailed(_) => ErrorKind::Execution,
            RelayError::Spawn(_) => ErrorKind::Spawn,
            RelayError::Queue(_) => ErrorKind::QueueConnectivity,
            RelayError::Startup(_) => ErrorKind::Startup,
        }
    }
}
