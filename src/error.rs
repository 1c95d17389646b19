//! Error types for declaration, synthesis, and sandboxed execution.

use std::time::Duration;

use thiserror::Error;

/// A declaration stub or builder input could not be turned into a
/// [`FunctionDecl`](crate::FunctionDecl).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No `def` header was found in the stub.
    #[error("no function definition found in declaration")]
    MissingDefinition,

    /// A function or parameter name is not usable as a Python identifier.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    /// The same parameter name appears twice.
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),

    /// The header could not be parsed.
    #[error("malformed signature: {0}")]
    Malformed(String),
}

/// Failures reported by a generation oracle.
#[derive(Error, Debug)]
pub enum OracleError {
    /// The request never produced an HTTP response.
    #[error("oracle request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The oracle answered with a non-success status.
    #[error("oracle returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response body was not a usable completion.
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

impl OracleError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            OracleError::Status { status, .. } => Some(*status),
            OracleError::Request(e) => e.status().map(|s| s.as_u16()),
            OracleError::InvalidResponse(_) => None,
        }
    }
}

/// Failures while synthesizing an implementation.
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// The oracle does not know the requested model.
    #[error(
        "model '{model}' not found; check https://platform.openai.com/docs/models for available \
         models and override it with AnyDefOptions::builder().model(..) or ANYDEF_MODEL"
    )]
    UnknownModel {
        /// The model identifier that was rejected.
        model: String,
    },

    /// Any other oracle-side failure, unchanged.
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Errors raised by an isolated runtime.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The execution exceeded the configured timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// The execution exceeded memory limits.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// Failed to initialize the Wasm runtime.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// Failed to load or instantiate the Python interpreter module.
    #[error("failed to load Python interpreter: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The interpreter trapped or the host task failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// I/O error while preparing an execution.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The script asked for something the runtime does not grant.
    #[error("configuration error: {0}")]
    Config(String),

    /// The interpreter wasm file was not found.
    #[error("Python interpreter wasm not found at: {0}")]
    InterpreterNotFound(String),

    /// Execution ran out of fuel (instruction limit).
    #[error("execution ran out of fuel after {consumed:?} instructions")]
    OutOfFuel {
        /// Number of instructions consumed before running out.
        consumed: Option<u64>,
    },
}

impl SandboxError {
    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// True when the fault came from the executed code hitting a limit
    /// rather than from the runtime's own setup.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            SandboxError::MemoryLimitExceeded(_) | SandboxError::OutOfFuel { .. }
        )
    }
}

/// A Python exception recovered from interpreter stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonException {
    /// The exception class, e.g. `ValueError`.
    pub exception_type: String,
    /// The exception message, possibly empty.
    pub message: String,
    /// The full traceback, if one was printed.
    pub traceback: Option<String>,
}

impl std::fmt::Display for PythonException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.exception_type)
        } else {
            write!(f, "{}: {}", self.exception_type, self.message)
        }
    }
}

/// Errors from the generate-cache-execute pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The declaration has no usable signature.
    #[error("invalid declaration: {0}")]
    Signature(#[from] SignatureError),

    /// The implementation could not be synthesized.
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    /// An argument is outside what the transport encoding can carry.
    #[error("cannot encode {what}: {message}")]
    ArgumentEncoding {
        /// `positional arguments` or `keyword arguments`.
        what: &'static str,
        /// Why the encoding was rejected.
        message: String,
    },

    /// The sandbox ran the script and reported a fault.
    #[error("sandbox execution error: {diagnostic}")]
    SandboxExecution {
        /// The runtime's diagnostic text (usually stderr).
        diagnostic: String,
        /// The Python exception, when stderr contains a recognizable one.
        exception: Option<PythonException>,
    },

    /// The script finished but printed no result envelope.
    #[error("result not found in sandbox output: {stdout}")]
    ResultNotFound {
        /// Raw captured stdout.
        stdout: String,
    },

    /// The returned value does not fit the caller's expected type.
    #[error("cannot decode result: {0}")]
    ResultDecoding(#[source] serde_json::Error),

    /// The sandbox did not finish within its budget.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// The isolated runtime itself could not be set up or driven.
    #[error("sandbox runtime failure: {0}")]
    Runtime(#[source] SandboxError),
}

impl Error {
    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Check if this error is the unknown-model synthesis failure.
    pub fn is_unknown_model(&self) -> bool {
        matches!(self, Error::Synthesis(SynthesisError::UnknownModel { .. }))
    }

    /// Check if the synthesized code itself failed inside the sandbox.
    pub fn is_sandbox_execution(&self) -> bool {
        matches!(self, Error::SandboxExecution { .. })
    }
}

impl From<SandboxError> for Error {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Timeout(budget) => Error::Timeout(budget),
            err if err.is_resource_limit() => Error::SandboxExecution {
                diagnostic: err.to_string(),
                exception: None,
            },
            err => Error::Runtime(err),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure surfaced by a wrapped function, tagged with its name.
#[derive(Error, Debug)]
#[error("error executing {function}: {source}")]
pub struct InvocationError {
    /// Name of the declared function.
    pub function: String,
    /// What went wrong.
    #[source]
    pub source: Error,
}

impl InvocationError {
    pub(crate) fn new(function: impl Into<String>, source: Error) -> Self {
        Self {
            function: function.into(),
            source,
        }
    }

    /// The underlying failure.
    pub fn kind(&self) -> &Error {
        &self.source
    }

    /// Unwrap into the underlying failure.
    pub fn into_kind(self) -> Error {
        self.source
    }

    /// Check if the call failed by timing out.
    pub fn is_timeout(&self) -> bool {
        self.source.is_timeout()
    }

    /// Check if the call failed because the model is unknown.
    pub fn is_unknown_model(&self) -> bool {
        self.source.is_unknown_model()
    }
}

/// Parse a Python exception from stderr output.
///
/// This attempts to extract the exception type, message, and traceback
/// from Python's standard error output format.
pub fn parse_python_exception(stderr: &str) -> Option<PythonException> {
    let lines: Vec<&str> = stderr.lines().collect();

    let mut exception_line = None;
    let mut traceback_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("Traceback (most recent call last):") {
            traceback_start = Some(i);
            continue;
        }
        // The last unindented exception-shaped line wins.
        if !line.starts_with(' ') && looks_like_exception(line) {
            exception_line = Some((i, *line));
        }
    }

    let (line_idx, exception_str) = exception_line?;
    let (exception_type, message) = match exception_str.split_once(':') {
        Some((ty, msg)) => (ty.trim().to_string(), msg.trim().to_string()),
        None => (exception_str.trim().to_string(), String::new()),
    };
    let traceback = traceback_start
        .filter(|start| *start < line_idx)
        .map(|start| lines[start..=line_idx].join("\n"));

    Some(PythonException {
        exception_type,
        message,
        traceback,
    })
}

fn looks_like_exception(line: &str) -> bool {
    const SUFFIXES: [&str; 3] = ["Error", "Exception", "Warning"];
    const STANDALONE: [&str; 4] = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    if !line.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return false;
    }

    // Only the part before the first colon can name the exception, and
    // it may be dotted (`json.decoder.JSONDecodeError`).
    let head = line.split(':').next().unwrap_or(line).trim_end();
    if head.contains(' ') {
        return false;
    }
    let class = head.rsplit('.').next().unwrap_or(head);

    SUFFIXES.iter().any(|suffix| class.ends_with(suffix)) || STANDALONE.contains(&class)
}
