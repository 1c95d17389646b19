//! Compiled interpreter modules, shared across sandboxes.
//!
//! Compiling the RustPython module is by far the most expensive part of
//! creating a sandbox. A compiled [`Module`] is tied to the [`Engine`]
//! that compiled it, so the cache stores the pair.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, PoisonError, RwLock};

use wasmtime::{Engine, Module};

use crate::error::SandboxError;

/// An engine and the interpreter module compiled for it.
///
/// Both halves are reference counted, so clones are cheap.
#[derive(Clone)]
pub struct Interpreter {
    engine: Engine,
    module: Module,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("engine", &"<wasmtime::Engine>")
            .field("module", &self.module.name())
            .finish()
    }
}

impl Interpreter {
    /// Read and compile the interpreter at `path`.
    pub fn load(path: &Path, enable_fuel: bool) -> Result<Self, SandboxError> {
        let engine = Engine::new(&engine_config(enable_fuel)).map_err(|e| {
            SandboxError::RuntimeInit(anyhow::anyhow!("failed to create engine: {}", e))
        })?;

        let wasm_bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::InterpreterNotFound(path.display().to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;

        let module = Module::new(&engine, &wasm_bytes).map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!("failed to compile module: {}", e))
        })?;

        Ok(Self { engine, module })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn module(&self) -> &Module {
        &self.module
    }
}

fn engine_config(enable_fuel: bool) -> wasmtime::Config {
    let mut config = wasmtime::Config::new();
    config.epoch_interruption(true);
    config.consume_fuel(enable_fuel);
    config
}

type CacheKey = (PathBuf, bool);

/// A thread-safe cache of compiled interpreters keyed by path and fuel mode.
#[derive(Debug, Default)]
pub struct InterpreterCache {
    entries: RwLock<HashMap<CacheKey, Interpreter>>,
}

impl InterpreterCache {
    /// Create a new empty interpreter cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached interpreter or compile it if not present.
    ///
    /// The path is canonicalized so relative and absolute spellings of
    /// the same file share one entry.
    pub fn get_or_load(
        &self,
        path: impl AsRef<Path>,
        enable_fuel: bool,
    ) -> Result<Interpreter, SandboxError> {
        let path = path.as_ref();
        let canonical = std::fs::canonicalize(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::InterpreterNotFound(path.display().to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;
        let key = (canonical, enable_fuel);

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = entries.get(&key) {
                return Ok(hit.clone());
            }
        }

        // Compile outside any lock.
        let interpreter = Interpreter::load(&key.0, enable_fuel)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have finished compiling first.
        Ok(entries.entry(key).or_insert(interpreter).clone())
    }

    /// Get the number of cached interpreters.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_INTERPRETERS: LazyLock<InterpreterCache> = LazyLock::new(InterpreterCache::new);

/// Get the process-wide interpreter cache.
pub fn global_interpreters() -> &'static InterpreterCache {
    &GLOBAL_INTERPRETERS
}
