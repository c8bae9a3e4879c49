/// HTTP backend against an in-process fake MCP endpoint
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use toolhub_core::{Backend, BackendError, HttpBackend, ServerSpec};

async fn fake_mcp(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let method = body["method"].as_str().unwrap_or_default();
    let params = body.get("params").cloned().unwrap_or(Value::Null);

    let reply = |result: Value| Json(json!({"jsonrpc": "2.0", "id": id, "result": result}));

    match method {
        "initialize" => reply(json!({"serverInfo": {"name": "fake"}})).into_response(),
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => match params.get("cursor").and_then(Value::as_str) {
            None => reply(json!({
                "tools": [{"name": "search", "description": "Search things"}],
                "nextCursor": "page-2",
            }))
            .into_response(),
            Some(_) => reply(json!({"tools": [{"name": "fetch"}]})).into_response(),
        },
        "tools/call" => match params["name"].as_str().unwrap_or_default() {
            "echo" => reply(json!({"arguments": params["arguments"]})).into_response(),
            "scalar" => reply(json!(5)).into_response(),
            "bare" => Json(json!({"status": "done"})).into_response(),
            "boom" => Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32000, "message": "remote exploded"},
            }))
            .into_response(),
            "whoami" => {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                reply(json!({"authorization": auth})).into_response()
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "no such tool").into_response(),
        },
        _ => (StatusCode::BAD_REQUEST, "unexpected method").into_response(),
    }
}

/// Same endpoint, but anything without an id is refused
async fn strict_mcp(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if body.get("id").is_none() {
        return (StatusCode::BAD_REQUEST, "notifications unsupported").into_response();
    }
    fake_mcp(headers, Json(body)).await
}

async fn spawn_fake() -> String {
    let app = Router::new()
        .route("/mcp", post(fake_mcp))
        .route("/strict", post(strict_mcp))
        .route(
            "/down",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn spec(url: String, headers: &[(&str, &str)]) -> ServerSpec {
    ServerSpec {
        transport_type: "http".to_string(),
        url,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        ..Default::default()
    }
}

fn backend(url: String, headers: &[(&str, &str)]) -> HttpBackend {
    HttpBackend::new("remote", &spec(url, headers), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_initialize_and_paginated_listing() {
    let base = spawn_fake().await;
    let backend = backend(format!("{base}/mcp"), &[]);

    backend.initialize().await.unwrap();
    let tools = backend.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "fetch"]);
    assert_eq!(tools[0].description.as_deref(), Some("Search things"));
}

#[tokio::test]
async fn test_rejected_initialized_notification_is_not_fatal() {
    let base = spawn_fake().await;
    let backend = backend(format!("{base}/strict"), &[]);

    backend.initialize().await.unwrap();
    let tools = backend.list_tools().await.unwrap();
    assert_eq!(tools.len(), 2);
}

#[tokio::test]
async fn test_call_result_shapes() {
    let base = spawn_fake().await;
    let backend = backend(format!("{base}/mcp"), &[]);

    let echoed = backend.call_tool("echo", Value::Null).await.unwrap();
    assert_eq!(echoed, json!({"arguments": {}}));

    let scalar = backend.call_tool("scalar", json!({})).await.unwrap();
    assert_eq!(scalar, json!({"result": 5}));

    let bare = backend.call_tool("bare", json!({})).await.unwrap();
    assert_eq!(bare, json!({"status": "done"}));
}

#[tokio::test]
async fn test_error_member_becomes_remote_error() {
    let base = spawn_fake().await;
    let backend = backend(format!("{base}/mcp"), &[]);

    let err = backend.call_tool("boom", json!({})).await.unwrap_err();
    assert!(matches!(err, BackendError::Remote(ref m) if m == "remote exploded"));
}

#[tokio::test]
async fn test_error_status_carries_body() {
    let base = spawn_fake().await;
    let backend = backend(format!("{base}/down"), &[]);

    let err = backend.call_tool("anything", json!({})).await.unwrap_err();
    match err {
        BackendError::HttpStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_configured_headers_are_sent() {
    let base = spawn_fake().await;
    let backend = backend(format!("{base}/mcp"), &[("Authorization", "Bearer t0ken")]);

    let result = backend.call_tool("whoami", json!({})).await.unwrap();
    assert_eq!(result["authorization"], "Bearer t0ken");
    backend.close().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = backend(format!("http://{addr}/mcp"), &[]);
    let err = backend.initialize().await.unwrap_err();
    assert_eq!(err.code(), "TRANSPORT_ERROR");
}

#[tokio::test]
async fn test_missing_url_and_bad_headers_are_rejected() {
    let err = HttpBackend::new("remote", &spec(String::new(), &[]), Duration::from_secs(1))
        .err()
        .unwrap();
    assert!(matches!(err, BackendError::MissingField { field: "url", .. }));

    let err = HttpBackend::new(
        "remote",
        &spec("http://localhost/mcp".to_string(), &[("bad header", "x")]),
        Duration::from_secs(1),
    )
    .err()
    .unwrap();
    assert_eq!(err.code(), "TRANSPORT_ERROR");
}
