//! Choosing the model, timeout, and oracle endpoint.
//!
//! Run with: cargo run --example model_selection
//!
//! ANYDEF_MODEL and ANYDEF_TIMEOUT_SECS override the defaults;
//! OPENAI_BASE_URL points at any OpenAI-compatible server.

use std::sync::Arc;
use std::time::Duration;

use anydef::prelude::*;
use anydef::OpenAiConfig;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anydef=debug")))
        .init();

    let oracle = Arc::new(OpenAiOracle::new(OpenAiConfig {
        request_timeout: Duration::from_secs(20),
        ..OpenAiConfig::from_env()
    })?);
    let sandbox = Arc::new(PythonSandbox::new(
        SandboxConfig::builder()
            .timeout(Duration::from_secs(10))
            .max_memory(32 * 1024 * 1024) // 32MB
            .build(),
    )?);

    let decl = anydef::declare!(
        r#"def word_frequencies(text: str, *, lowercase: bool = True) -> dict[str, int]:
    """Count how often each whitespace-separated word occurs in text."""
"#
    )?;

    println!("\n=== Environment-configured model ===");
    let options = AnyDefOptions::from_env();
    println!("model: {}, timeout: {:?}", options.model, options.timeout);
    let counter = AnyDef::builder(decl.clone())
        .options(options)
        .oracle(oracle.clone())
        .runtime(sandbox.clone())
        .build()?;
    match counter
        .call::<_, _, std::collections::BTreeMap<String, u32>>(("the cat and the hat",), ())
        .await
    {
        Ok(counts) => println!("{counts:?}"),
        Err(e) => eprintln!("Error: {}", e),
    }

    println!("\n=== Unknown model ===");
    let misconfigured = AnyDef::builder(decl.in_scope("model_selection::typo"))
        .options(AnyDefOptions::builder().model("gpt-3.5-turbo-typo").build())
        .oracle(oracle)
        .runtime(sandbox)
        .build()?;
    match misconfigured.call::<_, _, Value>(("a b a",), ()).await {
        Ok(value) => println!("unexpectedly got {value}"),
        Err(e) if e.is_unknown_model() => eprintln!("{}", e),
        Err(e) => eprintln!("Error: {}", e),
    }

    Ok(())
}
