use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use observe_query_mcp::config::{Config, ServerMode};
use observe_query_mcp::http::serve_http;
use observe_query_mcp::mcp::run_stdio;
use observe_query_mcp::tools::ToolEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries JSON-RPC, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => Config::load_from_path(Path::new(path))
            .with_context(|| format!("loading config {path}"))?,
        None => Config::from_env().context(
            "no config file given; set OBSERVE_CUSTOMER_ID, OBSERVE_API_TOKEN and OBSERVE_INSTANCE \
             or pass <config.yaml|json>",
        )?,
    };
    info!(observe = ?config.observe, mode = ?config.server.mode, "config loaded");

    let server = config.server.clone();
    let engine = Arc::new(ToolEngine::new(config)?);

    match server.mode {
        ServerMode::Stdio => run_stdio(engine).await?,
        ServerMode::Http => serve_http(engine, &server).await?,
        ServerMode::Both => {
            let http_engine = engine.clone();
            let http_server = server.clone();
            let http_task = tokio::spawn(async move { serve_http(http_engine, &http_server).await });
            let stdio_task = tokio::spawn(async move { run_stdio(engine).await });
            tokio::select! {
                res = http_task => res.context("http task panicked")??,
                res = stdio_task => res.context("stdio task panicked")??,
            }
        }
    }

    info!("shutting down");
    Ok(())
}
