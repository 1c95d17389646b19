//! # anydef
//!
//! Declare a Python function by its signature and docstring, and call it.
//!
//! The first call asks a language model to write the body, caches the
//! generated source for the life of the process, and runs it inside a
//! RustPython interpreter compiled to WebAssembly. Later calls skip
//! straight to execution.
//!
//! - **Declaration**: a `def` stub parsed into a [`FunctionDecl`]
//! - **Synthesis**: one request to an [`Oracle`](oracle::Oracle) per identity
//! - **Isolation**: no filesystem, network, or environment inside the sandbox
//! - **Transport**: arguments and results travel as JSON on stdin/stdout
//!
//! ## Example
//!
//! ```rust,ignore
//! use anydef::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let decl = anydef::declare!(
//!         r#"def fibonacci(n: int) -> int:
//!             """Return the n-th Fibonacci number."""
//!         "#
//!     )?;
//!
//!     let fibonacci = AnyDef::with_defaults(decl)?;
//!     let value: u64 = fibonacci.call((10,), ()).await?;
//!     assert_eq!(value, 55);
//!
//!     // The same function from synchronous code:
//!     let value: u64 = fibonacci.call_blocking((11,), ())?;
//!     assert_eq!(value, 89);
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! Generated code is untrusted. It runs in a fresh wasmtime store per call
//! with no preopened directories and no inherited environment, under a
//! memory cap and a wall-clock deadline enforced through epoch
//! interruption. The host never evaluates the returned text; it only
//! decodes the JSON value the harness prints.

pub mod adapter;
pub mod cache;
pub mod error;
pub mod executor;
pub mod oracle;
pub mod prelude;
pub mod sandbox;
pub mod signature;
pub mod synth;

// Re-export main types at crate root for convenience
pub use adapter::{AnyDef, AnyDefBuilder, AnyDefOptions, AnyDefOptionsBuilder, DEFAULT_TIMEOUT};
pub use cache::{global_cache, ImplementationCache};
pub use error::{
    Error, InvocationError, OracleError, PythonException, Result, SandboxError, SignatureError,
    SynthesisError,
};
pub use executor::{ExecutionRequest, SandboxExecutor};
pub use oracle::{CompletionRequest, OpenAiConfig, OpenAiOracle, Oracle};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::PythonSandbox;
pub use sandbox::runtime::{ExecutionResult, IsolatedRuntime, Script};
pub use signature::{FunctionDecl, FunctionDeclBuilder, Param, ParamKind};
pub use synth::{GenerationSettings, SynthesizedImplementation, Synthesizer};

#[cfg(test)]
mod tests {
    #[test]
    fn test_package_metadata() {
        assert_eq!(env!("CARGO_PKG_NAME"), "anydef");
        // No public repository yet; the field stays unset.
        assert_eq!(env!("CARGO_PKG_REPOSITORY"), "");
    }
}
