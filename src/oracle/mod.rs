//! The code-generation oracle seam.
//!
//! The pipeline only needs one operation from a generation service:
//! turn a structured request into a single text completion. [`Oracle`]
//! is that operation; [`openai::OpenAiOracle`] is the HTTP client for
//! OpenAI-compatible chat-completion endpoints.

pub mod openai;

use async_trait::async_trait;

use crate::error::OracleError;

pub use openai::{OpenAiConfig, OpenAiOracle};

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model identifier understood by the oracle.
    pub model: String,
    /// Instruction constraining the output to code only.
    pub system: String,
    /// The function description.
    pub user: String,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Sampling temperature; low values favor determinism.
    pub temperature: Option<f32>,
}

/// A text-completion service.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce one completion for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError>;
}
