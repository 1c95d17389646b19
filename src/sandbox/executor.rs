//! Core execution engine for the Python sandbox.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use wasmtime::{Linker, Store, Trap, UpdateDeadline};
use wasmtime_wasi::preview1;
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::error::SandboxError;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::interpreter::{global_interpreters, Interpreter};
use crate::sandbox::io::SandboxIo;
use crate::sandbox::limits::StoreData;
use crate::sandbox::runtime::{ExecutionResult, IsolatedRuntime, Script};

/// Limits copied into the blocking task.
#[derive(Debug, Clone, Copy)]
struct ExecLimits {
    max_memory: u64,
    max_fuel: Option<u64>,
    max_output_bytes: usize,
}

/// A sandboxed Python execution environment.
///
/// Every execution gets a fresh store and WASI context: no filesystem
/// preopens, no environment, no sockets.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    config: SandboxConfig,
    interpreter: Interpreter,
}

impl PythonSandbox {
    /// Create a new Python sandbox with the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        let enable_fuel = config.max_fuel.is_some();
        let interpreter = if config.cache_interpreter {
            global_interpreters().get_or_load(&config.interpreter_path, enable_fuel)?
        } else {
            Interpreter::load(&config.interpreter_path, enable_fuel)?
        };

        Ok(Self {
            config,
            interpreter,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute Python code in the sandbox under the configured timeout.
    ///
    /// # Arguments
    /// * `code` - The Python code to execute
    /// * `input` - Optional stdin input for the code
    pub async fn execute(&self, code: &str, input: Option<&str>) -> Result<ExecutionResult, SandboxError> {
        let mut script = Script::new(code, self.config.timeout);
        script.stdin = input.map(str::to_string);
        self.run(script).await
    }

    async fn run_script(&self, script: Script) -> Result<ExecutionResult, SandboxError> {
        let timeout = if script.timeout.is_zero() {
            self.config.timeout
        } else {
            script.timeout
        };
        let tick = self.config.epoch_tick_interval;
        let limits = ExecLimits {
            max_memory: self.config.max_memory,
            max_fuel: self.config.max_fuel,
            max_output_bytes: self.config.max_output_bytes,
        };
        let engine = self.interpreter.engine().clone();

        // Advance the epoch so running stores reach their deadline check
        let ticker_engine = engine.clone();
        let ticker_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                ticker_engine.increment_epoch();
            }
        });

        let interpreter = self.interpreter.clone();
        let deadline = Instant::now() + timeout;
        let exec_handle = tokio::task::spawn_blocking(move || {
            execute_sync(
                &interpreter,
                &script.source,
                script.stdin.as_deref(),
                limits,
                deadline,
                timeout,
            )
        });

        // The store traps itself at the deadline; this race only fires if
        // the interpreter is stuck somewhere the epoch is never checked.
        let result = tokio::select! {
            result = exec_handle => match result {
                Ok(inner_result) => inner_result,
                Err(e) => Err(SandboxError::ExecutionFailed(format!("task panicked: {}", e))),
            },
            _ = tokio::time::sleep(timeout + tick * 4) => {
                Err(SandboxError::Timeout(timeout))
            }
        };

        ticker_handle.abort();
        // Past the deadline, one more tick makes an orphaned store trap.
        engine.increment_epoch();
        result
    }
}

#[async_trait]
impl IsolatedRuntime for PythonSandbox {
    async fn run(&self, script: Script) -> Result<ExecutionResult, SandboxError> {
        if script.allow_net {
            return Err(SandboxError::Config(
                "network access is not available in the WASI sandbox".to_string(),
            ));
        }

        tracing::debug!(timeout = ?script.timeout, bytes = script.source.len(), "running script");
        let result = self.run_script(script).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "sandbox run failed");
        }
        result
    }
}

/// Synchronous execution (runs in blocking task).
fn execute_sync(
    interpreter: &Interpreter,
    code: &str,
    input: Option<&str>,
    limits: ExecLimits,
    deadline: Instant,
    budget: Duration,
) -> Result<ExecutionResult, SandboxError> {
    let io = SandboxIo::new(input, limits.max_output_bytes);

    // No preopened directories, no inherited environment, and WASI
    // Preview 1 has no sockets.
    let mut builder = WasiCtxBuilder::new();
    builder.args(&["python", "-c", code]);
    io.attach(&mut builder);
    let wasi_ctx = builder.build_p1();

    let mut store = Store::new(
        interpreter.engine(),
        StoreData::new(limits.max_memory, wasi_ctx, deadline),
    );
    store.limiter(|data| &mut data.limiter);

    // Check the wall clock on every epoch tick.
    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(|mut ctx| {
        if ctx.data_mut().check_deadline(Instant::now()) {
            Err(anyhow::anyhow!("sandbox deadline exceeded"))
        } else {
            Ok(UpdateDeadline::Continue(1))
        }
    });

    if let Some(fuel) = limits.max_fuel {
        store.set_fuel(fuel).map_err(|e| {
            SandboxError::RuntimeInit(anyhow::anyhow!("failed to set fuel: {}", e))
        })?;
    }

    let mut linker = Linker::new(interpreter.engine());
    preview1::add_to_linker_sync(&mut linker, |data: &mut StoreData| &mut data.wasi)
        .map_err(|e| SandboxError::RuntimeInit(anyhow::anyhow!("failed to link WASI: {}", e)))?;

    let instance = linker
        .instantiate(&mut store, interpreter.module())
        .map_err(|e| match store.data().limiter.hit() {
            Some(hit) => SandboxError::MemoryLimitExceeded(format!("during instantiation: {hit}")),
            None => SandboxError::ModuleLoad(anyhow::anyhow!("failed to instantiate: {}", e)),
        })?;

    let start = instance
        .get_typed_func::<(), ()>(&mut store, "_start")
        .map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!("failed to get _start function: {}", e))
        })?;

    let exit_code = match start.call(&mut store, ()) {
        Ok(()) => 0,
        Err(e) => {
            if store.data().timed_out() {
                return Err(SandboxError::Timeout(budget));
            }
            if let Some(hit) = store.data().limiter.hit() {
                return Err(SandboxError::MemoryLimitExceeded(hit.to_string()));
            }
            if e.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel) {
                return Err(SandboxError::OutOfFuel {
                    consumed: limits.max_fuel,
                });
            }
            match e.downcast_ref::<I32Exit>() {
                Some(exit) => exit.0,
                None => return Err(SandboxError::ExecutionFailed(e.to_string())),
            }
        }
    };

    Ok(ExecutionResult {
        stdout: io.stdout_str(),
        stderr: io.stderr_str(),
        exit_code,
    })
}
