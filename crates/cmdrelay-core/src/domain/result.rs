//! ExecutionResult - 1 回のコマンド実行の結果

use serde::{Deserialize, Serialize};

/// Outcome of one command execution.
///
/// `success` is true iff the process exited with code 0. On failure `error`
/// carries the stderr text (not the exit code), a spawn error message, or a
/// synthetic reason such as `"Bad JSON"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(stdout: String, stderr: String) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            error: None,
        }
    }

    /// Non-zero exit: stderr doubles as the error signal.
    pub fn failed(stdout: String, stderr: String) -> Self {
        let error = Some(stderr.clone());
        Self {
            success: false,
            stdout,
            stderr,
            error,
        }
    }

    /// The process never started, so there is no output to report.
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::rejected(message)
    }

    /// Synthetic failure produced without running anything.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(reason.into()),
        }
    }

    /// Error text for HTTP/queue callers. Empty when a failed command wrote nothing to stderr.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_reports_stderr_as_error() {
        let r = ExecutionResult::failed("partial\n".into(), "boom\n".into());
        assert!(!r.success);
        assert_eq!(r.stdout, "partial\n");
        assert_eq!(r.error.as_deref(), Some("boom\n"));
    }

    #[test]
    fn silent_failure_has_empty_error_message() {
        let r = ExecutionResult::failed(String::new(), String::new());
        assert!(!r.success);
        assert_eq!(r.error_message(), "");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["error"], "");
    }

    #[test]
    fn success_serializes_without_error_key() {
        let r = ExecutionResult::succeeded("hi\n".into(), String::new());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v, serde_json::json!({"success": true, "stdout": "hi\n", "stderr": ""}));
    }
}
