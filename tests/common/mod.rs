#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::HeaderMap;
use axum::Router;
use observe_query_mcp::client::ObserveClient;
use observe_query_mcp::config::Config;
use serde_json::Value;
use tokio::net::TcpListener;

/// One request as seen by the fake backend.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub params: HashMap<String, String>,
    pub body: Value,
    pub authorization: String,
    pub accept: String,
}

#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<Captured>>>);

impl Recorder {
    pub fn record(&self, params: HashMap<String, String>, headers: &HeaderMap, body: &str) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        self.0.lock().unwrap().push(Captured {
            params,
            body: serde_json::from_str(body).unwrap_or(Value::Null),
            authorization: header("authorization"),
            accept: header("accept"),
        });
    }

    pub fn all(&self) -> Vec<Captured> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn last(&self) -> Captured {
        self.all().pop().expect("no request recorded")
    }
}

pub async fn spawn_backend(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn test_config(base_url: &str) -> Config {
    let mut cfg = Config::default();
    cfg.observe.customer_id = "101".into();
    cfg.observe.api_token = "tok".into();
    cfg.observe.base_url = Some(base_url.to_string());
    cfg.observe.request_timeout_secs = 10;
    cfg
}

pub fn test_client(base_url: &str) -> ObserveClient {
    ObserveClient::new(&test_config(base_url).observe).unwrap()
}

pub fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        map.insert(*k, v.parse().unwrap());
    }
    map
}
