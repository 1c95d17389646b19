//! Declare a function by signature and docstring, then call it.
//!
//! Run with: cargo run --example fibonacci
//!
//! Note: Requires OPENAI_API_KEY and rustpython.wasm in assets/

use anydef::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anydef=info")))
        .init();

    let decl = anydef::declare!(
        r#"def fibonacci(n: int) -> int:
    """Return the n-th Fibonacci number, with fibonacci(0) == 0 and fibonacci(1) == 1."""
"#
    )?;

    // Show the generated source the first time it is used
    let options = AnyDefOptions::builder().debug(true).build();
    let fibonacci = match AnyDef::builder(decl).options(options).build() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to set up fibonacci: {}", e);
            eprintln!("Make sure rustpython.wasm is present in the assets/ directory");
            return Err(e.into());
        }
    };

    println!("\n=== Awaited calls ===");
    for n in [0, 1, 10, 20] {
        let value: u64 = fibonacci.call((n,), ()).await?;
        println!("fibonacci({n}) = {value}");
    }

    println!("\n=== Blocking call ===");
    let value: u64 = fibonacci.call_blocking((30,), ())?;
    println!("fibonacci(30) = {value}");

    println!("\n=== Bad argument ===");
    match fibonacci.call::<_, _, u64>(("ten",), ()).await {
        Ok(value) => println!("unexpectedly got {value}"),
        Err(e) => eprintln!("Error: {}", e),
    }

    Ok(())
}
