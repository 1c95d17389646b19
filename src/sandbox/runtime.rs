//! Contract between the pipeline and an isolated execution service.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SandboxError;

/// A script submitted for isolated execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// Program text.
    pub source: String,
    /// Data made available on the program's standard input.
    pub stdin: Option<String>,
    /// Wall-clock budget.
    pub timeout: Duration,
    /// Whether the program may open network connections.
    pub allow_net: bool,
}

impl Script {
    /// A network-isolated script with the given budget.
    pub fn new(source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            stdin: None,
            timeout,
            allow_net: false,
        }
    }

    /// Provide standard input.
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Result of an isolated execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured stdout output.
    pub stdout: String,
    /// Captured stderr output.
    pub stderr: String,
    /// Exit code (0 for success).
    pub exit_code: i32,
}

impl ExecutionResult {
    /// Check if the execution was successful (exit code 0).
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An isolated, resource-bounded script runner.
///
/// Implementations must not share execution state between calls and
/// must enforce `script.timeout`, reporting it as
/// [`SandboxError::Timeout`].
#[async_trait]
pub trait IsolatedRuntime: Send + Sync {
    /// Run `script` to completion.
    async fn run(&self, script: Script) -> Result<ExecutionResult, SandboxError>;
}
