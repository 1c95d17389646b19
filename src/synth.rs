//! Turning a declaration into implementation source via the oracle.

use std::sync::Arc;

use crate::error::SynthesisError;
use crate::oracle::{CompletionRequest, Oracle};
use crate::signature::FunctionDecl;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
/// Generation budget used when none is configured.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
/// Low temperature for more consistent code.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

const SYSTEM_INSTRUCTION: &str =
    "You are a Python code generator. Output only valid Python code, no explanations.";

/// Model and sampling settings for one synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            temperature: Some(DEFAULT_TEMPERATURE),
        }
    }
}

/// Source text produced for one declared function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedImplementation {
    /// Name of the function the source defines.
    pub function: String,
    /// A single self-contained Python function definition.
    pub source: String,
    /// The model that produced it.
    pub model: String,
}

/// Asks an [`Oracle`] for implementations.
#[derive(Clone)]
pub struct Synthesizer {
    oracle: Arc<dyn Oracle>,
}

impl std::fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("oracle", &"<dyn Oracle>")
            .finish()
    }
}

impl Synthesizer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Perform exactly one oracle round-trip for `decl`.
    ///
    /// A 404 from the oracle means the model does not exist and is
    /// reported as [`SynthesisError::UnknownModel`]; every other
    /// failure is passed through.
    pub async fn synthesize(
        &self,
        decl: &FunctionDecl,
        settings: &GenerationSettings,
    ) -> Result<SynthesizedImplementation, SynthesisError> {
        let request = build_request(decl, settings);

        tracing::info!(function = decl.name(), model = %settings.model, "synthesizing implementation");
        let raw = self.oracle.complete(&request).await.map_err(|err| {
            if err.status() == Some(404) {
                SynthesisError::UnknownModel {
                    model: settings.model.clone(),
                }
            } else {
                SynthesisError::Oracle(err)
            }
        })?;

        Ok(SynthesizedImplementation {
            function: decl.name().to_string(),
            source: strip_code_fences(&raw).to_string(),
            model: settings.model.clone(),
        })
    }
}

/// Build the generation request for `decl`.
pub fn build_request(decl: &FunctionDecl, settings: &GenerationSettings) -> CompletionRequest {
    CompletionRequest {
        model: settings.model.clone(),
        system: SYSTEM_INSTRUCTION.to_string(),
        user: build_prompt(decl),
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    }
}

/// The user message describing what to generate.
pub fn build_prompt(decl: &FunctionDecl) -> String {
    let name = decl.name();
    let signature = decl.signature();
    let doc = decl.doc().unwrap_or("None");

    format!(
        "Generate a complete Python function implementation.\n\
         \n\
         Function name: {name}\n\
         Signature: {signature}\n\
         Docstring: {doc}\n\
         \n\
         Requirements:\n\
         1. Provide ONLY the complete function definition starting with 'def {name}'\n\
         2. Do NOT include any markdown formatting, code blocks, or explanations\n\
         3. The function must be self-contained (no external imports except standard library)\n\
         4. Use only Python standard library features\n\
         \n\
         Example format:\n\
         def {name}{signature}:\n    \
             # implementation\n    \
             return result\n"
    )
}

/// Remove a surrounding markdown code fence, if the oracle added one.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut code = raw.trim();
    for opener in ["```python", "```py", "```"] {
        if let Some(rest) = code.strip_prefix(opener) {
            code = rest;
            break;
        }
    }
    code.strip_suffix("```").unwrap_or(code).trim()
}
