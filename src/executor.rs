//! Running a synthesized implementation in the isolated runtime.
//!
//! Arguments never become program text. The script is the
//! implementation followed by a fixed harness; the two argument
//! payloads travel on stdin, one JSON document per line, and the
//! harness prints the return value inside a single-key envelope.
//!
//! Values JSON cannot carry without loss (integers outside the 64-bit
//! range, NaN and infinities, non-JSON types) are reported by the
//! harness in an error envelope instead and surface as
//! [`Error::ResultDecoding`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{parse_python_exception, Error, Result};
use crate::sandbox::runtime::{IsolatedRuntime, Script};
use crate::signature::validate_identifier;

/// Key of the JSON object that wraps the return value in stdout.
pub const RESULT_KEY: &str = "__anydef_result__";

/// Key of the JSON object the harness prints when the return value has
/// no lossless JSON form.
pub const UNREPRESENTABLE_KEY: &str = "__anydef_unrepresentable__";

/// Extra time granted to the runtime before the executor gives up on it.
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

const HARNESS: &str = r#"

def __anydef_bounded(value):
    if isinstance(value, bool) or value is None:
        return
    if isinstance(value, int):
        if not -(2 ** 63) <= value < 2 ** 64:
            raise OverflowError("integer %d does not fit in 64 bits" % value)
    elif isinstance(value, dict):
        for item in value.values():
            __anydef_bounded(item)
    elif isinstance(value, (list, tuple)):
        for item in value:
            __anydef_bounded(item)


def __anydef_main():
    import json
    import sys
    args = json.loads(sys.stdin.readline())
    kwargs = json.loads(sys.stdin.readline())
    value = __anydef_target(*args, **kwargs)
    try:
        __anydef_bounded(value)
        line = json.dumps({"__anydef_result__": value}, allow_nan=False)
    except (OverflowError, ValueError, TypeError) as exc:
        line = json.dumps({"__anydef_unrepresentable__": str(exc)})
    print(line)


__anydef_main()
"#;

/// Positional and keyword arguments, each encoded as one JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArguments {
    args: String,
    kwargs: String,
}

impl EncodedArguments {
    /// Encode `args` and `kwargs` for transport.
    ///
    /// `args` must serialize to a JSON array and `kwargs` to a JSON
    /// object; `()` stands for "none" in either position.
    pub fn new<A, K>(args: &A, kwargs: &K) -> Result<Self>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let args = match encode("positional arguments", args)? {
            Value::Null => Value::Array(Vec::new()),
            array @ Value::Array(_) => array,
            other => {
                return Err(Error::ArgumentEncoding {
                    what: "positional arguments",
                    message: format!("expected a sequence, got {}", kind_of(&other)),
                })
            }
        };
        let kwargs = match encode("keyword arguments", kwargs)? {
            Value::Null => Value::Object(Default::default()),
            object @ Value::Object(_) => object,
            other => {
                return Err(Error::ArgumentEncoding {
                    what: "keyword arguments",
                    message: format!("expected a mapping, got {}", kind_of(&other)),
                })
            }
        };

        Ok(Self {
            args: args.to_string(),
            kwargs: kwargs.to_string(),
        })
    }

    /// The stdin payload: encoded positional args, then keyword args.
    pub fn stdin_payload(&self) -> String {
        format!("{}\n{}\n", self.args, self.kwargs)
    }
}

/// One call, ready to submit: implementation plus encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    implementation: String,
    function: String,
    arguments: EncodedArguments,
    timeout: Duration,
}

impl ExecutionRequest {
    /// Encode the arguments and assemble a request.
    pub fn new<A, K>(
        implementation: &str,
        function: &str,
        args: &A,
        kwargs: &K,
        timeout: Duration,
    ) -> Result<Self>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let arguments = EncodedArguments::new(args, kwargs)?;
        Self::from_encoded(implementation, function, arguments, timeout)
    }

    /// Assemble a request from arguments that are already encoded.
    pub fn from_encoded(
        implementation: &str,
        function: &str,
        arguments: EncodedArguments,
        timeout: Duration,
    ) -> Result<Self> {
        validate_identifier(function)?;
        Ok(Self {
            implementation: implementation.to_string(),
            function: function.to_string(),
            arguments,
            timeout,
        })
    }

    /// The program submitted to the runtime.
    pub fn script_source(&self) -> String {
        let mut source = String::with_capacity(self.implementation.len() + HARNESS.len() + 64);
        source.push_str(&self.implementation);
        source.push_str("\n\n__anydef_target = ");
        source.push_str(&self.function);
        source.push_str(HARNESS);
        source
    }

    /// The stdin payload: encoded positional args, then keyword args.
    pub fn stdin_payload(&self) -> String {
        self.arguments.stdin_payload()
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn into_script(self) -> Script {
        Script::new(self.script_source(), self.timeout).with_stdin(self.stdin_payload())
    }
}

fn encode<T: Serialize + ?Sized>(what: &'static str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::ArgumentEncoding {
        what,
        message: e.to_string(),
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Drives an [`IsolatedRuntime`] for synthesized implementations.
#[derive(Clone)]
pub struct SandboxExecutor {
    runtime: Arc<dyn IsolatedRuntime>,
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("runtime", &"<dyn IsolatedRuntime>")
            .finish()
    }
}

impl SandboxExecutor {
    pub fn new(runtime: Arc<dyn IsolatedRuntime>) -> Self {
        Self { runtime }
    }

    /// Encode the arguments, run the implementation, and decode its result.
    pub async fn execute<A, K>(
        &self,
        implementation: &str,
        function: &str,
        args: &A,
        kwargs: &K,
        timeout: Duration,
    ) -> Result<Value>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let request = ExecutionRequest::new(implementation, function, args, kwargs, timeout)?;
        self.run(request).await
    }

    /// Run an already encoded request.
    pub async fn run(&self, request: ExecutionRequest) -> Result<Value> {
        let timeout = request.timeout;
        let function = request.function.clone();

        tracing::debug!(function = %function, ?timeout, "executing in sandbox");
        let outcome = tokio::time::timeout(timeout + TIMEOUT_GRACE, self.runtime.run(request.into_script()))
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        if !outcome.is_success() {
            let diagnostic = if outcome.stderr.trim().is_empty() {
                format!("exit code {}", outcome.exit_code)
            } else {
                outcome.stderr.trim().to_string()
            };
            tracing::warn!(function = %function, exit_code = outcome.exit_code, "sandboxed code failed");
            return Err(Error::SandboxExecution {
                exception: parse_python_exception(&outcome.stderr),
                diagnostic,
            });
        }

        extract_result(&outcome.stdout)
    }
}

/// Find the result envelope in captured stdout, scanning from the end.
///
/// The last line that parses as an object holding either the result key
/// or the unrepresentable key decides the outcome.
pub fn extract_result(stdout: &str) -> Result<Value> {
    let envelope = stdout.lines().rev().find_map(|line| {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(Value::Object(mut envelope)) => {
                if let Some(value) = envelope.remove(RESULT_KEY) {
                    Some(Ok(value))
                } else {
                    envelope.remove(UNREPRESENTABLE_KEY).map(Err)
                }
            }
            _ => None,
        }
    });

    match envelope {
        Some(Ok(value)) => Ok(value),
        Some(Err(reason)) => {
            let reason = match reason {
                Value::String(text) => text,
                other => other.to_string(),
            };
            Err(Error::ResultDecoding(<serde_json::Error as serde::de::Error>::custom(
                format!("return value has no JSON form: {reason}"),
            )))
        }
        None => Err(Error::ResultNotFound {
            stdout: stdout.to_string(),
        }),
    }
}
