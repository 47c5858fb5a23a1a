//! Command - HTTP リクエスト・キューメッセージ・レスポンスの型
//!
//! - `CommandRequest`: `POST /execute` の body（camelCase）
//! - `CommandPayload`: コマンドキューの message body（snake_case、producer が生成）
//! - `ResponseMessage`: レスポンスキューに送る相関付きの結果

use serde::{Deserialize, Serialize};

use super::errors::RelayError;
use super::result::ExecutionResult;

/// Body of `POST /execute`.
///
/// Both fields are optional at the wire level so that a missing command
/// surfaces as a validation error rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            project_name: None,
        }
    }

    pub fn with_project(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = Some(project_name.into());
        self
    }

    /// The command to run, or `MissingCommand` when absent or blank.
    pub fn validated_command(&self) -> Result<&str, RelayError> {
        match self.command.as_deref() {
            Some(command) if !command.trim().is_empty() => Ok(command),
            _ => Err(RelayError::MissingCommand),
        }
    }
}

/// Deserialized command-queue message body.
///
/// Extra keys written by producers (e.g. `timestamp`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    #[serde(default)]
    pub project_name: Option<String>,
    pub message_id: String,
}

impl CommandPayload {
    pub fn parse(body: &[u8]) -> Result<Self, RelayError> {
        let payload: CommandPayload =
            serde_json::from_slice(body).map_err(|e| RelayError::BadPayload(e.to_string()))?;
        if payload.command.trim().is_empty() {
            return Err(RelayError::BadPayload("empty command".to_string()));
        }
        Ok(payload)
    }

    /// Best-effort lookup of `message_id` in a body that failed `parse`.
    ///
    /// Returns `None` when the body is not a JSON object or carries no
    /// string `message_id`; such messages cannot be correlated.
    pub fn recover_message_id(body: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Message written to the response queue.
///
/// Successful runs always carry `stdout` and `stderr`; failures carry
/// `error` plus whatever output the process produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub message_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseMessage {
    pub fn from_result(message_id: impl Into<String>, result: ExecutionResult) -> Self {
        let ExecutionResult {
            success,
            stdout,
            stderr,
            error,
        } = result;

        if success {
            return Self {
                message_id: message_id.into(),
                success,
                stdout: Some(stdout),
                stderr: Some(stderr),
                error: None,
            };
        }

        Self {
            message_id: message_id.into(),
            success,
            stdout: Some(stdout).filter(|s| !s.is_empty()),
            stderr: Some(stderr).filter(|s| !s.is_empty()),
            error: Some(error.unwrap_or_default()),
        }
    }

    pub fn to_json(&self) -> String {
        // 全フィールドが String/bool なので失敗しない
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"message_id":{:?},"success":false}}"#, self.message_id)
        })
    }
}
