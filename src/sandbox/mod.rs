//! The isolated runtime that executes synthesized code.
//!
//! [`runtime::IsolatedRuntime`] is the contract the pipeline depends on;
//! [`executor::PythonSandbox`] is the default implementation, a RustPython
//! interpreter compiled to WASI and run under wasmtime.

pub mod config;
pub mod executor;
pub mod interpreter;
pub mod io;
pub mod limits;
pub mod runtime;
