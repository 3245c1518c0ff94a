use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::{ObserveError, Result};
use crate::mcp::{process_request, RpcRequest};
use crate::tools::{tool_definitions, ToolEngine};
use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ToolEngine>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

async fn list_tools_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "tools": tool_definitions() }))
}

async fn call_tool_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let args = match payload {
        Ok(Json(args)) => args,
        Err(e) => {
            return ErrorResponse {
                error: format!("invalid request body: {e}"),
            }
            .into_response()
        }
    };

    match state.engine.call(&name, args).await {
        Some(res) => (StatusCode::OK, Json(res)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown tool: {name}") })),
        )
            .into_response(),
    }
}

/// JSON-RPC over plain HTTP, same dispatch as the stdio loop.
async fn message_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> impl IntoResponse {
    match payload {
        Ok(Json(req)) => {
            let resp = process_request(state.engine.clone(), req).await;
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(e) => ErrorResponse {
            error: format!("invalid request body: {e}"),
        }
        .into_response(),
    }
}

pub fn build_router(engine: Arc<ToolEngine>) -> Router {
    let state = AppState { engine };
    Router::new()
        .route("/tools", get(list_tools_handler))
        .route("/tools/:name", post(call_tool_handler))
        .route("/message", post(message_handler))
        .with_state(state)
}

pub async fn serve_http(engine: Arc<ToolEngine>, server: &ServerConfig) -> Result<()> {
    let router = build_router(engine);

    let addr = format!(
        "{}:{}",
        server.http_addr.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
        server.http_port.unwrap_or(3000)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ObserveError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, router).await.map_err(|e| e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    use crate::config::Config;

    fn create_test_engine() -> Arc<ToolEngine> {
        let mut cfg = Config::default();
        cfg.observe.customer_id = "1".into();
        cfg.observe.api_token = "t".into();
        cfg.observe.base_url = Some("http://127.0.0.1:9".into());
        Arc::new(ToolEngine::new(cfg).unwrap())
    }

    #[tokio::test]
    async fn tools_endpoint_lists_definitions() {
        let app = build_router(create_test_engine());
        let resp = app
            .oneshot(Request::builder().uri("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert!(v["tools"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["name"] == "search_logs"));
    }

    #[tokio::test]
    async fn unknown_tool_returns_404() {
        let app = build_router(create_test_engine());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/nope")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_body_returns_400() {
        let app = build_router(create_test_engine());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/search_logs")
                    .header("content-type", "application/json")
                    .body(Body::from("not-json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn message_endpoint_speaks_json_rpc() {
        let app = build_router(create_test_engine());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/message")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["result"]["tools"].as_array().unwrap().len(), 9);
    }
}
