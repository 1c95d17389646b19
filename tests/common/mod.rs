//! Shared fakes for the integration tests.
//!
//! [`CountingOracle`] stands in for the generation service and
//! [`NativeRuntime`] for the Python interpreter: it honours the same
//! stdin/stdout contract as the real harness but evaluates registered
//! Rust closures instead of Python.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anydef::error::{OracleError, SandboxError};
use anydef::executor::RESULT_KEY;
use anydef::oracle::{CompletionRequest, Oracle};
use anydef::sandbox::runtime::{ExecutionResult, IsolatedRuntime, Script};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// An oracle that answers with canned text and counts its calls.
pub struct CountingOracle {
    reply: String,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    failure_status: u16,
    delay: Duration,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl CountingOracle {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            failure_status: 500,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `times` calls with `status`.
    pub fn failing(mut self, status: u16, times: usize) -> Self {
        self.failure_status = status;
        self.failures_left = AtomicUsize::new(times);
        self
    }

    /// Sleep before answering, so concurrent callers overlap.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for CountingOracle {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OracleError::Status {
                status: self.failure_status,
                body: "{\"error\":\"canned failure\"}".to_string(),
            });
        }
        Ok(self.reply.clone())
    }
}

type NativeFn = Box<dyn Fn(&[Value], &Map<String, Value>) -> Result<Value, String> + Send + Sync>;

/// A runtime that executes registered closures in place of Python.
#[derive(Default)]
pub struct NativeRuntime {
    functions: HashMap<String, NativeFn>,
    scripts: Mutex<Vec<Script>>,
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: &str,
        f: impl Fn(&[Value], &Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.to_string(), Box::new(f));
        self
    }

    pub fn runs(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }

    pub fn last_script(&self) -> Option<Script> {
        self.scripts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl IsolatedRuntime for NativeRuntime {
    async fn run(&self, script: Script) -> Result<ExecutionResult, SandboxError> {
        self.scripts.lock().unwrap().push(script.clone());
        assert!(!script.allow_net, "scripts must be network isolated");
        assert!(!script.source.contains("```"), "fences reached the runtime");

        let target = script
            .source
            .lines()
            .find_map(|line| line.strip_prefix("__anydef_target = "))
            .map(str::trim)
            .ok_or_else(|| SandboxError::ExecutionFailed("no target binding".to_string()))?;
        let Some(function) = self.functions.get(target) else {
            return Ok(failure("NameError", &format!("name '{target}' is not defined")));
        };

        let stdin = script.stdin.unwrap_or_default();
        let mut lines = stdin.lines();
        let args: Vec<Value> = serde_json::from_str(lines.next().unwrap_or("[]")).unwrap();
        let kwargs: Map<String, Value> = serde_json::from_str(lines.next().unwrap_or("{}")).unwrap();

        Ok(match function(&args, &kwargs) {
            Ok(value) => {
                let mut envelope = Map::new();
                envelope.insert(RESULT_KEY.to_string(), value);
                ExecutionResult {
                    stdout: format!("debug: computing {target}\n{}\n", Value::Object(envelope)),
                    ..ExecutionResult::default()
                }
            }
            Err(message) => failure("ValueError", &message),
        })
    }
}

fn failure(exception: &str, message: &str) -> ExecutionResult {
    ExecutionResult {
        stdout: String::new(),
        stderr: format!(
            "Traceback (most recent call last):\n  File \"<string>\", line 3, in <module>\n{exception}: {message}\n"
        ),
        exit_code: 1,
    }
}

/// A runtime that never finishes.
pub struct HangingRuntime;

#[async_trait]
impl IsolatedRuntime for HangingRuntime {
    async fn run(&self, _script: Script) -> Result<ExecutionResult, SandboxError> {
        std::future::pending().await
    }
}

/// Iterative Fibonacci over JSON, as the generated code would compute it.
pub fn fibonacci(args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, String> {
    let n = args
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| "n must be an integer".to_string())?;
    if n < 0 {
        return Err("n must be non-negative".to_string());
    }
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a + b);
    }
    Ok(Value::from(a))
}

pub const FIBONACCI_STUB: &str = r#"def fibonacci(n: int) -> int:
    """Return the n-th Fibonacci number, with fibonacci(0) == 0 and fibonacci(1) == 1."""
"#;

pub const FIBONACCI_SOURCE: &str = "def fibonacci(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a";
