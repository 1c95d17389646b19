//! End-to-end tests of the declare, synthesize, cache, execute pipeline.
//!
//! The oracle and the interpreter are replaced by the fakes in
//! `common`, so these run without network access or rustpython.wasm.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anydef::prelude::*;
use anydef::{ImplementationCache, SynthesisError};
use common::{fibonacci, CountingOracle, HangingRuntime, NativeRuntime, FIBONACCI_SOURCE, FIBONACCI_STUB};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn build(
    stub: &str,
    oracle: &Arc<CountingOracle>,
    runtime: &Arc<NativeRuntime>,
    cache: &Arc<ImplementationCache>,
) -> AnyDef {
    AnyDef::builder(FunctionDecl::parse(stub).unwrap())
        .oracle(oracle.clone())
        .runtime(runtime.clone())
        .cache(cache.clone())
        .build()
        .unwrap()
}

fn fibonacci_fixture() -> (Arc<CountingOracle>, Arc<NativeRuntime>, Arc<ImplementationCache>) {
    (
        Arc::new(CountingOracle::replying(FIBONACCI_SOURCE)),
        Arc::new(NativeRuntime::new().with("fibonacci", fibonacci)),
        Arc::new(ImplementationCache::new()),
    )
}

#[tokio::test]
async fn test_fibonacci_values() {
    let (oracle, runtime, cache) = fibonacci_fixture();
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    assert_eq!(f.call::<_, _, u64>((0,), ()).await.unwrap(), 0);
    assert_eq!(f.call::<_, _, u64>((1,), ()).await.unwrap(), 1);
    assert_eq!(f.call::<_, _, u64>((10,), ()).await.unwrap(), 55);
    assert_eq!(runtime.runs(), 3);
}

#[tokio::test]
async fn test_synthesis_happens_once_per_identity() {
    let (oracle, runtime, cache) = fibonacci_fixture();
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);
    let g = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let first: u64 = f.call((5,), ()).await.unwrap();
    let second: u64 = f.call((5,), ()).await.unwrap();
    let other_wrapper: u64 = g.call((5,), ()).await.unwrap();

    assert_eq!((first, second, other_wrapper), (5, 5, 5));
    assert_eq!(oracle.calls(), 1);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("fibonacci"));
}

#[tokio::test]
async fn test_prompt_carries_signature_and_docstring() {
    let (oracle, runtime, cache) = fibonacci_fixture();
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);
    let _: u64 = f.call((3,), ()).await.unwrap();

    let requests = oracle.requests();
    assert_eq!(requests.len(), 1);
    let prompt = &requests[0].user;
    assert!(prompt.contains("def fibonacci(n: int) -> int"));
    assert!(prompt.contains("n-th Fibonacci number"));
    assert_eq!(requests[0].model, "gpt-3.5-turbo");
}

#[tokio::test]
async fn test_fenced_reply_is_stripped_before_execution() {
    let oracle = Arc::new(CountingOracle::replying(format!("```python\n{FIBONACCI_SOURCE}\n```")));
    let runtime = Arc::new(NativeRuntime::new().with("fibonacci", fibonacci));
    let cache = Arc::new(ImplementationCache::new());
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let value: u64 = f.call((7,), ()).await.unwrap();
    assert_eq!(value, 13);

    let imp = f.implementation().await.unwrap();
    assert_eq!(imp.source, FIBONACCI_SOURCE);
    let script = runtime.last_script().unwrap();
    assert!(script.source.starts_with("def fibonacci(n):"));
}

#[tokio::test]
async fn test_unknown_model_is_reported_and_not_cached() {
    let oracle = Arc::new(CountingOracle::replying(FIBONACCI_SOURCE).failing(404, 1));
    let runtime = Arc::new(NativeRuntime::new().with("fibonacci", fibonacci));
    let cache = Arc::new(ImplementationCache::new());
    let options = AnyDefOptions::builder().model("gpt-does-not-exist").build();
    let f = AnyDef::builder(FunctionDecl::parse(FIBONACCI_STUB).unwrap())
        .options(options)
        .oracle(oracle.clone())
        .runtime(runtime.clone())
        .cache(cache.clone())
        .build()
        .unwrap();

    let err = f.call::<_, _, u64>((3,), ()).await.unwrap_err();
    assert!(err.is_unknown_model());
    assert_eq!(err.function, "fibonacci");
    assert!(err.to_string().contains("gpt-does-not-exist"));
    assert!(cache.is_empty());
    assert_eq!(runtime.runs(), 0);
}

#[tokio::test]
async fn test_failed_synthesis_is_retried() {
    let oracle = Arc::new(CountingOracle::replying(FIBONACCI_SOURCE).failing(500, 1));
    let runtime = Arc::new(NativeRuntime::new().with("fibonacci", fibonacci));
    let cache = Arc::new(ImplementationCache::new());
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let err = f.call::<_, _, u64>((3,), ()).await.unwrap_err();
    match err.kind() {
        Error::Synthesis(SynthesisError::Oracle(inner)) => assert_eq!(inner.status(), Some(500)),
        other => panic!("unexpected error: {other:?}"),
    }

    let value: u64 = f.call((3,), ()).await.unwrap();
    assert_eq!(value, 2);
    assert_eq!(oracle.calls(), 2);
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Summary {
    count: usize,
    total: f64,
    labels: Vec<String>,
    extra: Option<BTreeMap<String, bool>>,
}

#[tokio::test]
async fn test_structured_arguments_and_results_round_trip() {
    let oracle = Arc::new(CountingOracle::replying("def summarize(values, labels, *, extra=None):\n    ..."));
    let runtime = Arc::new(NativeRuntime::new().with("summarize", |args, kwargs| {
        let values = args[0].as_array().ok_or("values must be a list")?;
        let total: f64 = values.iter().filter_map(Value::as_f64).sum();
        Ok(json!({
            "count": values.len(),
            "total": total,
            "labels": args[1],
            "extra": kwargs.get("extra").cloned().unwrap_or(Value::Null),
        }))
    }));
    let cache = Arc::new(ImplementationCache::new());
    let f = build(
        "def summarize(values: list[float], labels: list[str], *, extra: dict | None = None) -> dict: ...",
        &oracle,
        &runtime,
        &cache,
    );

    let kwargs = BTreeMap::from([("extra", BTreeMap::from([("ok".to_string(), true)]))]);
    let summary: Summary = f
        .call((vec![1.5, 2.5, -1.0], ["a", "b"]), kwargs)
        .await
        .unwrap();

    assert_eq!(
        summary,
        Summary {
            count: 3,
            total: 3.0,
            labels: vec!["a".to_string(), "b".to_string()],
            extra: Some(BTreeMap::from([("ok".to_string(), true)])),
        }
    );

    let none: Summary = f.call((Vec::<f64>::new(), Vec::<String>::new()), ()).await.unwrap();
    assert_eq!(none.count, 0);
    assert_eq!(none.extra, None);
}

#[tokio::test]
async fn test_null_result_decodes_as_unit_option() {
    let oracle = Arc::new(CountingOracle::replying("def nothing():\n    return None"));
    let runtime = Arc::new(NativeRuntime::new().with("nothing", |_, _| Ok(Value::Null)));
    let cache = Arc::new(ImplementationCache::new());
    let f = build("def nothing() -> None: ...", &oracle, &runtime, &cache);

    let value: Option<i32> = f.call((), ()).await.unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_python_exception_is_wrapped_with_function_name() {
    let (oracle, runtime, cache) = fibonacci_fixture();
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let err = f.call::<_, _, u64>((-1,), ()).await.unwrap_err();
    assert!(err.to_string().starts_with("error executing fibonacci:"));
    match err.into_kind() {
        Error::SandboxExecution { diagnostic, exception } => {
            assert!(diagnostic.contains("n must be non-negative"));
            let exception = exception.unwrap();
            assert_eq!(exception.exception_type, "ValueError");
            assert!(exception.traceback.is_some());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_implementation_defining_wrong_name_fails_in_sandbox() {
    let oracle = Arc::new(CountingOracle::replying("def fib(n):\n    return n"));
    let runtime = Arc::new(NativeRuntime::new());
    let cache = Arc::new(ImplementationCache::new());
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let err = f.call::<_, _, u64>((1,), ()).await.unwrap_err();
    assert!(err.kind().is_sandbox_execution());
}

#[tokio::test(start_paused = true)]
async fn test_runaway_execution_times_out() {
    let oracle = Arc::new(CountingOracle::replying("def spin():\n    while True: pass"));
    let cache = Arc::new(ImplementationCache::new());
    let f = AnyDef::builder(FunctionDecl::parse("def spin(): ...").unwrap())
        .options(AnyDefOptions::builder().timeout(Duration::from_secs(1)).build())
        .oracle(oracle)
        .runtime(Arc::new(HangingRuntime))
        .cache(cache)
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = f.call::<_, _, Value>((), ()).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err.kind(), Error::Timeout(budget) if *budget == Duration::from_secs(1)));
    assert!(started.elapsed() <= Duration::from_millis(1500));
}

#[tokio::test]
async fn test_scoped_declarations_do_not_share_cache_entries() {
    let oracle = Arc::new(CountingOracle::replying(FIBONACCI_SOURCE));
    let runtime = Arc::new(NativeRuntime::new().with("fibonacci", fibonacci));
    let cache = Arc::new(ImplementationCache::new());

    let make = |scope: &str| {
        AnyDef::builder(FunctionDecl::parse(FIBONACCI_STUB).unwrap().in_scope(scope))
            .oracle(oracle.clone())
            .runtime(runtime.clone())
            .cache(cache.clone())
            .build()
            .unwrap()
    };
    let a = make("billing");
    let b = make("reports");

    let _: u64 = a.call((4,), ()).await.unwrap();
    let _: u64 = b.call((4,), ()).await.unwrap();

    assert_eq!(oracle.calls(), 2);
    assert!(cache.contains("billing::fibonacci"));
    assert!(cache.contains("reports::fibonacci"));
}

#[test]
fn test_declare_macro_scopes_to_module() {
    let decl = anydef::declare!(FIBONACCI_STUB).unwrap();
    assert_eq!(decl.identity(), "pipeline_tests::fibonacci");
}

#[test]
fn test_blocking_call_from_plain_thread() {
    let (oracle, runtime, cache) = fibonacci_fixture();
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let value: u64 = f.call_blocking((10,), ()).unwrap();
    assert_eq!(value, 55);
}

#[tokio::test]
async fn test_blocking_and_async_conventions_agree() {
    let (oracle, runtime, cache) = fibonacci_fixture();
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    for n in [0u32, 1, 2, 10, 20] {
        let awaited: u64 = f.call((n,), ()).await.unwrap();
        // Called from inside the runtime; must not deadlock it.
        let blocked: u64 = f.call_blocking((n,), ()).unwrap();
        assert_eq!(awaited, blocked);
    }
    assert_eq!(oracle.calls(), 1);
}

#[test]
fn test_concurrent_blocking_calls_synthesize_once() {
    let oracle = Arc::new(CountingOracle::replying(FIBONACCI_SOURCE).delayed(Duration::from_millis(50)));
    let runtime = Arc::new(NativeRuntime::new().with("fibonacci", fibonacci));
    let cache = Arc::new(ImplementationCache::new());
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let results: Vec<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8u32)
            .map(|n| {
                let f = f.clone();
                scope.spawn(move || f.call_blocking::<_, _, u64>((n,), ()).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results, vec![0, 1, 1, 2, 3, 5, 8, 13]);
    assert_eq!(oracle.calls(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_calls_synthesize_once() {
    let oracle = Arc::new(CountingOracle::replying(FIBONACCI_SOURCE).delayed(Duration::from_millis(50)));
    let runtime = Arc::new(NativeRuntime::new().with("fibonacci", fibonacci));
    let cache = Arc::new(ImplementationCache::new());
    let f = build(FIBONACCI_STUB, &oracle, &runtime, &cache);

    let mut handles = Vec::new();
    for n in 0..16u32 {
        let f = f.clone();
        handles.push(tokio::spawn(async move { f.call::<_, _, u64>((n,), ()).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_openai_oracle_end_to_end() {
    use anydef::{OpenAiConfig, OpenAiOracle};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": format!("```python\n{FIBONACCI_SOURCE}\n```")}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = OpenAiOracle::new(OpenAiConfig {
        api_key: Some("sk-test".to_string()),
        endpoint: server.uri(),
        ..OpenAiConfig::default()
    })
    .unwrap();
    let f = AnyDef::builder(FunctionDecl::parse(FIBONACCI_STUB).unwrap())
        .options(AnyDefOptions::builder().model("gpt-4o-mini").build())
        .oracle(Arc::new(oracle))
        .runtime(Arc::new(NativeRuntime::new().with("fibonacci", fibonacci)))
        .cache(Arc::new(ImplementationCache::new()))
        .build()
        .unwrap();

    let first: u64 = f.call((10,), ()).await.unwrap();
    let second: u64 = f.call((12,), ()).await.unwrap();
    assert_eq!((first, second), (55, 144));
}
