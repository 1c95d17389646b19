//! The caller-facing wrapper around a declared function.
//!
//! [`AnyDef`] resolves an implementation through the cache (synthesizing
//! on the first miss) and runs it in the sandbox. It offers two calling
//! conventions over the same pipeline:
//!
//! - [`AnyDef::call`] is `async` and yields to the caller's scheduler
//!   while the sandbox runs.
//! - [`AnyDef::call_blocking`] always runs the pipeline on a dedicated
//!   worker thread with its own runtime and blocks the calling thread
//!   until it finishes. It never re-enters the caller's scheduler, so it
//!   is safe to use from plain threads and from inside a tokio runtime
//!   alike, at the cost of occupying the calling thread.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{global_cache, ImplementationCache};
use crate::error::{Error, InvocationError, Result, SandboxError, SynthesisError};
use crate::executor::{EncodedArguments, ExecutionRequest, SandboxExecutor};
use crate::oracle::{OpenAiOracle, Oracle};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::executor::PythonSandbox;
use crate::sandbox::runtime::IsolatedRuntime;
use crate::signature::FunctionDecl;
use crate::synth::{
    GenerationSettings, SynthesizedImplementation, Synthesizer, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    DEFAULT_TEMPERATURE,
};

/// Sandbox budget used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MODEL_VAR: &str = "ANYDEF_MODEL";
const TIMEOUT_VAR: &str = "ANYDEF_TIMEOUT_SECS";

/// Per-function configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyDefOptions {
    /// Oracle model used for synthesis.
    pub model: String,
    /// Sandbox time budget per call.
    pub timeout: Duration,
    /// Emit the synthesized source before its first execution.
    pub debug: bool,
    /// Generation budget.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl Default for AnyDefOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            debug: false,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            temperature: Some(DEFAULT_TEMPERATURE),
        }
    }
}

impl AnyDefOptions {
    /// Create a new builder for AnyDefOptions.
    pub fn builder() -> AnyDefOptionsBuilder {
        AnyDefOptionsBuilder::default()
    }

    /// Defaults, overridden by `ANYDEF_MODEL` and `ANYDEF_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(model) = lookup(MODEL_VAR).filter(|m| !m.trim().is_empty()) {
            options.model = model.trim().to_string();
        }
        match lookup(TIMEOUT_VAR).map(|t| t.trim().parse::<u64>()) {
            Some(Ok(secs)) if secs > 0 => options.timeout = Duration::from_secs(secs),
            Some(_) => tracing::warn!("ignoring invalid {TIMEOUT_VAR}"),
            None => {}
        }
        options
    }

    /// The synthesis part of these options.
    pub fn generation(&self) -> GenerationSettings {
        GenerationSettings {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Builder for creating AnyDefOptions instances.
#[derive(Debug, Clone, Default)]
pub struct AnyDefOptionsBuilder {
    options: AnyDefOptions,
}

impl AnyDefOptionsBuilder {
    /// Set the oracle model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = model.into();
        self
    }

    /// Set the sandbox timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Emit synthesized source before first execution.
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Set the generation budget; `None` leaves it to the oracle.
    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.options.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature; `None` leaves it to the oracle.
    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.options.temperature = temperature;
        self
    }

    /// Build the AnyDefOptions.
    pub fn build(self) -> AnyDefOptions {
        self.options
    }
}

struct Inner {
    decl: FunctionDecl,
    identity: String,
    options: AnyDefOptions,
    synthesizer: Synthesizer,
    executor: SandboxExecutor,
    cache: Arc<ImplementationCache>,
}

/// A declared function made callable.
///
/// Cloning is cheap; clones share configuration and collaborators.
#[derive(Clone)]
pub struct AnyDef {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AnyDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyDef")
            .field("decl", &self.inner.decl)
            .field("identity", &self.inner.identity)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl AnyDef {
    /// Start configuring a wrapper for `decl`.
    pub fn builder(decl: FunctionDecl) -> AnyDefBuilder {
        AnyDefBuilder {
            decl,
            options: None,
            oracle: None,
            runtime: None,
            cache: None,
        }
    }

    /// Wrap `decl` with default options, the environment-configured
    /// OpenAI oracle, and the default Python sandbox.
    pub fn with_defaults(decl: FunctionDecl) -> Result<Self> {
        Self::builder(decl).build()
    }

    /// The declared function name.
    pub fn name(&self) -> &str {
        self.inner.decl.name()
    }

    pub fn declaration(&self) -> &FunctionDecl {
        &self.inner.decl
    }

    pub fn options(&self) -> &AnyDefOptions {
        &self.inner.options
    }

    /// The cached implementation, synthesizing it if needed.
    pub async fn implementation(&self) -> std::result::Result<Arc<SynthesizedImplementation>, InvocationError> {
        self.resolve().await.map_err(|e| self.fail(e))
    }

    /// Call the function, awaiting the sandbox without blocking the
    /// current thread.
    ///
    /// `args` must serialize to a sequence and `kwargs` to a mapping;
    /// pass `()` for none. A tuple is the usual choice for `args`.
    ///
    /// ```rust,ignore
    /// let n: u64 = fibonacci.call((10,), ()).await?;
    /// ```
    pub async fn call<A, K, R>(&self, args: A, kwargs: K) -> std::result::Result<R, InvocationError>
    where
        A: Serialize,
        K: Serialize,
        R: DeserializeOwned,
    {
        self.call_value(&args, &kwargs)
            .await
            .and_then(|value| serde_json::from_value(value).map_err(Error::ResultDecoding))
            .map_err(|e| self.fail(e))
    }

    /// Call the function, blocking the current thread until it returns.
    ///
    /// The pipeline runs on a dedicated worker thread with its own
    /// runtime, so this may be called from inside an async context
    /// without deadlocking it; the calling thread is occupied for the
    /// duration either way.
    pub fn call_blocking<A, K, R>(&self, args: A, kwargs: K) -> std::result::Result<R, InvocationError>
    where
        A: Serialize + Send,
        K: Serialize + Send,
        R: DeserializeOwned + Send,
    {
        std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name(format!("anydef-{}", self.name()))
                .spawn_scoped(scope, || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|e| self.fail(Error::Runtime(SandboxError::RuntimeInit(e.into()))))?;
                    runtime.block_on(self.call(args, kwargs))
                })
                .map_err(|e| self.fail(Error::Runtime(SandboxError::Io(e))))?;

            worker.join().unwrap_or_else(|_| {
                Err(self.fail(Error::Runtime(SandboxError::ExecutionFailed(
                    "worker thread panicked".to_string(),
                ))))
            })
        })
    }

    /// Run the pipeline and return the raw decoded JSON value.
    pub async fn call_value<A, K>(&self, args: &A, kwargs: &K) -> Result<Value>
    where
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        // Reject unencodable arguments before spending an oracle call.
        let arguments = EncodedArguments::new(args, kwargs)?;
        let implementation = self.resolve().await?;
        let request = ExecutionRequest::from_encoded(
            &implementation.source,
            self.name(),
            arguments,
            self.inner.options.timeout,
        )?;
        self.inner.executor.run(request).await
    }

    async fn resolve(&self) -> Result<Arc<SynthesizedImplementation>> {
        let inner = &self.inner;
        let settings = inner.options.generation();
        let (implementation, fresh) = inner
            .cache
            .get_or_synthesize(&inner.identity, || {
                inner.synthesizer.synthesize(&inner.decl, &settings)
            })
            .await
            .map_err(Error::Synthesis)?;

        if fresh && inner.options.debug {
            tracing::info!(
                target: "anydef::debug",
                function = self.name(),
                model = %implementation.model,
                "generated code for {}:\n{}\n{}",
                self.name(),
                implementation.source,
                "-".repeat(40),
            );
        }
        Ok(implementation)
    }

    fn fail(&self, source: Error) -> InvocationError {
        InvocationError::new(self.name(), source)
    }
}

/// Builder for [`AnyDef`].
pub struct AnyDefBuilder {
    decl: FunctionDecl,
    options: Option<AnyDefOptions>,
    oracle: Option<Arc<dyn Oracle>>,
    runtime: Option<Arc<dyn IsolatedRuntime>>,
    cache: Option<Arc<ImplementationCache>>,
}

impl AnyDefBuilder {
    /// Use `options` instead of [`AnyDefOptions::default`].
    pub fn options(mut self, options: AnyDefOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Use a specific generation oracle.
    pub fn oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Use a specific isolated runtime.
    pub fn runtime(mut self, runtime: Arc<dyn IsolatedRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Use a private cache instead of the process-wide one.
    pub fn cache(mut self, cache: Arc<ImplementationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fill in defaults and build the wrapper.
    pub fn build(self) -> Result<AnyDef> {
        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => Arc::new(OpenAiOracle::from_env().map_err(SynthesisError::Oracle)?),
        };
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(PythonSandbox::new(SandboxConfig::default()).map_err(Error::Runtime)?),
        };

        let identity = self.decl.identity();
        Ok(AnyDef {
            inner: Arc::new(Inner {
                identity,
                decl: self.decl,
                options: self.options.unwrap_or_default(),
                synthesizer: Synthesizer::new(oracle),
                executor: SandboxExecutor::new(runtime),
                cache: self.cache.unwrap_or_else(global_cache),
            }),
        })
    }
}
