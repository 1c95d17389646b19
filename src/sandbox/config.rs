//! Settings for the default Python runtime.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::SandboxError;

const DEFAULT_INTERPRETER: &str = "assets/rustpython.wasm";

/// Configuration for [`PythonSandbox`](super::executor::PythonSandbox).
///
/// The per-call budget normally comes from the [`Script`](super::runtime::Script);
/// `timeout` only applies to scripts submitted with a zero budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Wall-clock budget for `execute` and for scripts that carry a zero budget.
    pub timeout: Duration,
    /// Linear memory cap in bytes.
    pub max_memory: u64,
    /// Instruction budget. `None` compiles the interpreter without fuel metering.
    pub max_fuel: Option<u64>,
    /// Location of the RustPython WASI build.
    pub interpreter_path: PathBuf,
    /// How often the engine epoch advances; bounds timeout latency.
    pub epoch_tick_interval: Duration,
    /// Capacity of each captured output stream.
    pub max_output_bytes: usize,
    /// Share compiled interpreters through the process-wide cache.
    pub cache_interpreter: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_memory: 64 * 1024 * 1024,
            max_fuel: None,
            interpreter_path: PathBuf::from(DEFAULT_INTERPRETER),
            epoch_tick_interval: Duration::from_millis(10),
            max_output_bytes: 1024 * 1024,
            cache_interpreter: true,
        }
    }
}

impl SandboxConfig {
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Reject settings the runtime cannot honour.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.epoch_tick_interval.is_zero() {
            return Err(SandboxError::Config("epoch tick interval must be non-zero".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(SandboxError::Config("fallback timeout must be non-zero".to_string()));
        }
        if self.max_memory == 0 {
            return Err(SandboxError::Config("memory limit must be non-zero".to_string()));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config("output capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`SandboxConfig`], starting from the defaults.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.config.max_memory = bytes;
        self
    }

    pub fn max_fuel(mut self, fuel: u64) -> Self {
        self.config.max_fuel = Some(fuel);
        self
    }

    pub fn interpreter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.interpreter_path = path.into();
        self
    }

    /// Finer ticks stop runaway code sooner at a small CPU cost.
    pub fn epoch_tick_interval(mut self, interval: Duration) -> Self {
        self.config.epoch_tick_interval = interval;
        self
    }

    /// Output past this many bytes per stream is dropped.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.config.max_output_bytes = bytes;
        self
    }

    pub fn cache_interpreter(mut self, enabled: bool) -> Self {
        self.config.cache_interpreter = enabled;
        self
    }

    pub fn build(self) -> SandboxConfig {
        self.config
    }
}
