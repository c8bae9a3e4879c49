// Minimal stdio MCP server.
//
// Tools: ping, echo, sleep, fail, crash. Behaviour switches (environment):
//   ECHO_NEWLINE=1       reply with newline-delimited JSON instead of Content-Length
//   ECHO_NOISE=1         emit an uncorrelated notification and a non-object frame before each reply
//   ECHO_PAGE_SIZE=n     paginate tools/list with nextCursor
//   ECHO_IGNORE_TERM=1   ignore SIGTERM (exercises the SIGKILL escalation)
//   ECHO_PREFIX=s        prepended to every tool name

use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use toolhub_core::backend::framing::{read_frame, write_frame};
use toolhub_core::telemetry::init_tracing;
use tracing::{debug, info};

struct Behaviour {
    newline: bool,
    noise: bool,
    page_size: Option<usize>,
    prefix: String,
}

impl Behaviour {
    fn from_env() -> Self {
        let flag = |key: &str| std::env::var(key).map(|v| v == "1").unwrap_or(false);
        Self {
            newline: flag("ECHO_NEWLINE"),
            noise: flag("ECHO_NOISE"),
            page_size: std::env::var("ECHO_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0),
            prefix: std::env::var("ECHO_PREFIX").unwrap_or_default(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    init_tracing();
    let behaviour = Behaviour::from_env();

    if std::env::var("ECHO_IGNORE_TERM").as_deref() == Ok("1") {
        ignore_sigterm()?;
    }

    info!(newline = behaviour.newline, "echo backend ready");

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    loop {
        let frame = match read_frame(&mut stdin).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let Ok(request) = serde_json::from_slice::<Value>(&frame) else {
            continue;
        };
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        debug!(method, "request");

        // Notifications get no reply
        let Some(id) = request.get("id").cloned() else {
            continue;
        };

        let outcome = handle(&behaviour, method, request.get("params")).await;
        let reply = match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
        };

        if behaviour.noise {
            send(&behaviour, &mut stdout, &json!({"jsonrpc": "2.0", "method": "notifications/message"})).await?;
            send(&behaviour, &mut stdout, &json!([1, 2, 3])).await?;
        }
        send(&behaviour, &mut stdout, &reply).await?;
    }

    Ok(())
}

#[cfg(unix)]
fn ignore_sigterm() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        while term.recv().await.is_some() {
            info!("SIGTERM ignored");
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn ignore_sigterm() -> std::io::Result<()> {
    Ok(())
}

async fn handle(
    behaviour: &Behaviour,
    method: &str,
    params: Option<&Value>,
) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "toolhub-echo-backend", "version": env!("CARGO_PKG_VERSION") },
        })),
        "tools/list" => Ok(list_tools(behaviour, params)),
        "tools/call" => call_tool(behaviour, params).await,
        other => Err((-32601, format!("Method not found: {other}"))),
    }
}

fn list_tools(behaviour: &Behaviour, params: Option<&Value>) -> Value {
    let names = ["ping", "echo", "sleep", "fail", "crash"];
    let tools: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "name": format!("{}{name}", behaviour.prefix),
                "description": format!("echo backend {name}"),
                "inputSchema": { "type": "object" },
            })
        })
        .collect();

    let Some(page_size) = behaviour.page_size else {
        return json!({ "tools": tools });
    };
    let start: usize = params
        .and_then(|p| p.get("cursor"))
        .and_then(Value::as_str)
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let end = (start + page_size).min(tools.len());
    let mut page = json!({ "tools": tools[start.min(end)..end].to_vec() });
    if end < tools.len() {
        page["nextCursor"] = json!(end.to_string());
    }
    page
}

async fn call_tool(behaviour: &Behaviour, params: Option<&Value>) -> Result<Value, (i64, String)> {
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or(Value::Null);

    let text = |t: String| json!({ "content": [{ "type": "text", "text": t }] });

    match name.strip_prefix(behaviour.prefix.as_str()).unwrap_or(name) {
        "ping" => Ok(text("pong".to_string())),
        "echo" => Ok(json!({
            "content": [{ "type": "text", "text": arguments.to_string() }],
            "arguments": arguments,
        })),
        "sleep" => {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(1000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(text(format!("slept {ms}ms")))
        }
        "fail" => Err((-32000, "tool failed on purpose".to_string())),
        "crash" => std::process::exit(3),
        other => Err((-32602, format!("Unknown tool: {other}"))),
    }
}

async fn send<W>(behaviour: &Behaviour, out: &mut W, message: &Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    if behaviour.newline {
        out.write_all(&body).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    } else {
        write_frame(out, &body).await
    }
}
