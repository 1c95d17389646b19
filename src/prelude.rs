//! Prelude module for convenient imports.

pub use crate::adapter::{AnyDef, AnyDefOptions};
pub use crate::error::{Error, InvocationError};
pub use crate::oracle::{OpenAiOracle, Oracle};
pub use crate::sandbox::{config::SandboxConfig, executor::PythonSandbox};
pub use crate::signature::{FunctionDecl, Param};
