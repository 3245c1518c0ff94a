use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::error::Result;
use crate::tools::{tool_definitions, ToolEngine};

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub async fn run_stdio(engine: Arc<ToolEngine>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();
    info!("observe MCP server running on stdio");

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("unparseable request: {e}");
                write_response(
                    &mut stdout,
                    RpcResponse {
                        jsonrpc: "2.0",
                        id: Value::Null,
                        result: None,
                        error: Some(RpcError {
                            code: -32700,
                            message: format!("parse error: {e}"),
                        }),
                    },
                )
                .await?;
                continue;
            }
        };

        // notifications carry no id and get no response
        if req.id.is_null() && req.method.starts_with("notifications/") {
            continue;
        }
        let resp = process_request(engine.clone(), req).await;
        write_response(&mut stdout, resp).await?;
    }

    Ok(())
}

pub async fn process_request(engine: Arc<ToolEngine>, req: RpcRequest) -> RpcResponse {
    match req.method.as_str() {
        "initialize" => handle_initialize(&req),
        "ping" => rpc_ok(&req, serde_json::json!({})),
        "notifications/initialized" => rpc_ok(&req, Value::Bool(true)),
        "tools/list" | "list_tools" => {
            rpc_ok(&req, serde_json::json!({ "tools": tool_definitions() }))
        }
        "tools/call" => handle_call(&engine, &req).await,
        // tool names are also accepted directly as methods
        name => match engine.call(name, req.params.clone()).await {
            Some(res) => rpc_ok(&req, serde_json::to_value(res).unwrap_or(Value::Null)),
            None => rpc_error(&req, -32601, format!("method not found: {}", req.method)),
        },
    }
}

fn handle_initialize(req: &RpcRequest) -> RpcResponse {
    rpc_ok(
        req,
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "observe",
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

async fn handle_call(engine: &ToolEngine, req: &RpcRequest) -> RpcResponse {
    let params: CallParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return rpc_error(req, -32602, format!("invalid params: {e}")),
    };
    match engine.call(&params.name, params.arguments).await {
        Some(res) => rpc_ok(req, serde_json::to_value(res).unwrap_or(Value::Null)),
        None => rpc_error(req, -32602, format!("unknown tool: {}", params.name)),
    }
}

async fn write_response(stdout: &mut tokio::io::Stdout, resp: RpcResponse) -> Result<()> {
    let line = serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string());
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn rpc_ok(req: &RpcRequest, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: Some(result),
        error: None,
    }
}

fn rpc_error(req: &RpcRequest, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: None,
        error: Some(RpcError { code, message }),
    }
}
