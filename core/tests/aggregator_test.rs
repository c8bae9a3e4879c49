/// Aggregator startup from config, routing and teardown with real backends
use serde_json::json;
use std::time::{Duration, Instant};
use toolhub_core::backend::BackendOptions;
use toolhub_core::{Aggregator, AggregatorOptions, BridgeConfig, CallError, ResolveError};

const ECHO_BACKEND: &str = env!("CARGO_BIN_EXE_toolhub-echo-backend");

fn options() -> AggregatorOptions {
    AggregatorOptions {
        init_retry: 2,
        init_retry_delay: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        backend: BackendOptions {
            request_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(1),
        },
    }
}

fn config() -> BridgeConfig {
    serde_json::from_value(json!({
        "mcpServers": {
            "alpha": { "command": ECHO_BACKEND },
            "my server!!": {
                "command": ECHO_BACKEND,
                "env": { "ECHO_NEWLINE": "1", "ECHO_PREFIX": "x_" }
            },
            "off": { "command": ECHO_BACKEND, "disabled": true },
            "ghost": { "command": "/definitely/not/a/real/binary" },
            "odd": { "command": ECHO_BACKEND, "transportType": "carrier-pigeon" },
            "nowhere": { "type": "http" }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_start_skips_disabled_and_failed_backends() {
    let aggregator = Aggregator::start(&config(), options()).await;

    assert_eq!(aggregator.backend_names(), vec!["alpha", "my_server"]);
    assert_eq!(aggregator.tool_count(), 10);

    let exported = aggregator.list_exported();
    let names: Vec<_> = exported.iter().map(|t| t.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert!(names.contains(&"alpha.ping"));
    assert!(names.contains(&"my_server.x_ping"));
    assert!(!names.iter().any(|n| n.starts_with("off.")));

    aggregator.shutdown().await;
}

#[tokio::test]
async fn test_calls_route_by_qualified_and_bare_names() {
    let aggregator = Aggregator::start(&config(), options()).await;

    let pong = aggregator.call("alpha.ping", json!({})).await.unwrap();
    assert_eq!(pong["content"][0]["text"], "pong");

    let suffixed = aggregator.call("x_echo", json!({"v": 1})).await.unwrap();
    assert_eq!(suffixed["arguments"], json!({"v": 1}));

    let err = aggregator.call("nope.ping", json!({})).await.unwrap_err();
    assert!(matches!(err, CallError::Resolve(ResolveError::Unknown(_))));

    let failed = aggregator.call("alpha.fail", json!({})).await.unwrap_err();
    assert_eq!(failed.to_string(), "tool failed on purpose");

    aggregator.shutdown().await;
}

#[tokio::test]
async fn test_call_timeout_is_reported() {
    let mut short = options();
    short.timeout = Duration::from_millis(100);
    let config: BridgeConfig = serde_json::from_value(json!({
        "mcpServers": { "alpha": { "command": ECHO_BACKEND } }
    }))
    .unwrap();
    let aggregator = Aggregator::start(&config, short).await;

    let err = aggregator
        .call("alpha.sleep", json!({"ms": 1000}))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("timed out after"));

    aggregator.shutdown().await;
}

#[tokio::test]
async fn test_colliding_sanitized_names_keep_first() {
    let config: BridgeConfig = serde_json::from_value(json!({
        "mcpServers": {
            "a b": { "command": ECHO_BACKEND },
            "a-b": { "command": ECHO_BACKEND, "env": { "ECHO_PREFIX": "dup_" } }
        }
    }))
    .unwrap();
    let aggregator = Aggregator::start(&config, options()).await;

    assert_eq!(aggregator.backend_names(), vec!["a_b"]);
    assert!(aggregator.registry().get("a_b.ping").is_some());
    assert!(aggregator.registry().get("a_b.dup_ping").is_none());

    aggregator.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_interrupted_start_keeps_what_was_admitted() {
    let config: BridgeConfig = serde_json::from_value(json!({
        "mcpServers": {
            "alpha": { "command": ECHO_BACKEND },
            "stuck": { "command": "sleep", "args": ["30"] },
            "zulu": { "command": ECHO_BACKEND }
        }
    }))
    .unwrap();
    let options = AggregatorOptions {
        init_retry: 8,
        timeout: Duration::from_secs(30),
        ..options()
    };

    let started = Instant::now();
    let aggregator = Aggregator::start_until(
        &config,
        options,
        tokio::time::sleep(Duration::from_secs(2)),
    )
    .await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(aggregator.backend_names(), vec!["alpha"]);

    aggregator.shutdown().await;
}
