// `/mcp` endpoint: JSON-RPC over POST, event-stream probe over GET

use crate::rpc::{
    CallParams, RpcRequest, RpcResponse, CALL_FAILED, INVALID_PARAMS, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Json,
};
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing::{debug, info, warn};

/// Protocol version announced to front-door clients
pub const SERVER_PROTOCOL_VERSION: &str = "2025-06-18";

pub const SERVER_NAME: &str = "toolhub-bridge";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// True when the client asked for `text/event-stream` delivery
pub fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("text/event-stream"))
}

pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let stream = wants_event_stream(&headers);

    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(target: "front_door", error = %e, "Unparseable request body");
            return deliver(RpcResponse::error(Value::Null, PARSE_ERROR, "Parse error"), stream);
        }
    };

    // Notifications never get a body, whatever their method
    let Some(id) = request.id else {
        debug!(target: "front_door", method = %request.method, "Notification acknowledged");
        return StatusCode::NO_CONTENT.into_response();
    };

    let response = dispatch(&state, id, &request.method, request.params).await;
    deliver(response, stream)
}

async fn dispatch(state: &AppState, id: Value, method: &str, params: Option<Value>) -> RpcResponse {
    match method {
        "initialize" => RpcResponse::result(
            id,
            json!({
                "protocolVersion": SERVER_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "tools/list" => RpcResponse::result(id, json!({ "tools": state.aggregator.list_exported() })),
        "tools/call" => {
            let params = match CallParams::from_params(params) {
                Ok(params) => params,
                Err(e) => {
                    debug!(target: "front_door", error = %e, "Invalid tools/call params");
                    return RpcResponse::error(id, INVALID_PARAMS, "Invalid params");
                }
            };
            let name = params.name.clone();
            match state.aggregator.call(&name, params.arguments()).await {
                Ok(result) => RpcResponse::result(id, result),
                Err(e) => {
                    warn!(target: "front_door", tool = %name, error = %e, "Tool call failed");
                    RpcResponse::error(id, CALL_FAILED, e.to_string())
                }
            }
        }
        other => {
            debug!(target: "front_door", method = %other, "Unknown method");
            RpcResponse::error(id, METHOD_NOT_FOUND, "Method not found")
        }
    }
}

/// Plain JSON, or one `message` event carrying the same envelope
fn deliver(response: RpcResponse, stream: bool) -> Response {
    if !stream {
        return Json(response).into_response();
    }
    let event = match Event::default().event("message").json_data(&response) {
        Ok(event) => event,
        Err(e) => {
            warn!(target: "front_door", error = %e, "Failed to encode response event");
            return Json(response).into_response();
        }
    };
    let events = tokio_stream::once(Ok::<_, Infallible>(event));
    ([(X_ACCEL_BUFFERING, "no")], Sse::new(events)).into_response()
}

/// Event-stream probe: announce the endpoint path, then idle with heartbeats
/// until the client goes away or the server begins shutting down.
pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !wants_event_stream(&headers) {
        return post_only().await.into_response();
    }
    info!(target: "front_door", "Event-stream client connected");

    let endpoint = Event::default().event("endpoint").data(state.endpoint.as_str());
    let idle = WatchStream::new(state.closing.clone())
        .take_while(|closing| !*closing)
        .filter_map(|_| None::<Result<Event, Infallible>>);
    let events = tokio_stream::once(Ok(endpoint)).chain(idle);

    let keep_alive = KeepAlive::new().interval(state.heartbeat).text("ping");
    ([(X_ACCEL_BUFFERING, "no")], Sse::new(events).keep_alive(keep_alive)).into_response()
}

pub async fn post_only() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, "POST only")
}
