//! Observe HTTP 传输层：鉴权、按端点类别判定状态码、JSON 与原始文本两种响应。

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ObserveConfig;
use crate::error::{ObserveError, Result};

pub const CURSOR_ID_HEADER: &str = "x-observe-cursor-id";
pub const NEXT_PAGE_HEADER: &str = "x-observe-next-page";
pub const TOTAL_ROWS_HEADER: &str = "x-observe-total-rows";

const NDJSON: &str = "application/x-ndjson";

/// Which statuses an endpoint treats as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Standard,
    QuerySubmit,
    QueryPage,
}

impl EndpointClass {
    pub fn accepts(self, status: u16) -> bool {
        match self {
            EndpointClass::Standard => matches!(status, 200 | 201 | 204),
            EndpointClass::QuerySubmit => matches!(status, 200 | 201 | 202 | 206),
            EndpointClass::QueryPage => matches!(status, 200 | 201 | 202),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub headers: HeaderMap,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
pub struct ObserveClient {
    http: reqwest::Client,
    base_url: String,
    auth: String,
}

impl ObserveClient {
    pub fn new(config: &ObserveConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ObserveError::ConfigError(format!("build http client failed: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            auth: config.auth_header(),
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        self.request_json(Method::GET, path, params, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        self.request_json(Method::POST, path, params, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        self.request_json(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.request_json::<serde_json::Value, ()>(Method::DELETE, path, &[], None)
            .await
            .map(|_| ())
    }

    pub async fn get_raw(
        &self,
        path: &str,
        params: &[(&str, String)],
        class: EndpointClass,
    ) -> Result<RawResponse> {
        self.request_raw(Method::GET, path, params, None::<&()>, class)
            .await
    }

    pub async fn post_raw<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        params: &[(&str, String)],
        class: EndpointClass,
    ) -> Result<RawResponse> {
        self.request_raw(Method::POST, path, params, Some(body), class)
            .await
    }

    async fn request_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Option<T>> {
        let mut request = self.build(method.clone(), path, params)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        debug!(%method, path, status = status.as_u16(), "observe api call");

        if !EndpointClass::Standard.accepts(status.as_u16()) {
            return Err(api_error(status, response.text().await.unwrap_or_default()));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text).map(Some).map_err(Into::into)
    }

    async fn request_raw<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&B>,
        class: EndpointClass,
    ) -> Result<RawResponse> {
        let mut request = self.build(method.clone(), path, params)?.header(ACCEPT, NDJSON);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        debug!(%method, path, status = status.as_u16(), ?class, "observe raw call");

        let headers = response.headers().clone();
        let text = response.text().await?;
        if !class.accepts(status.as_u16()) {
            return Err(api_error(status, text));
        }
        Ok(RawResponse {
            status: status.as_u16(),
            body: text,
            headers,
        })
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::RequestBuilder> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ObserveError::InvalidRequest(format!("invalid url for {path}: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params.iter().filter(|(_, v)| !v.is_empty()) {
                pairs.append_pair(k, v);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, &self.auth))
    }
}

fn api_error(status: StatusCode, body: String) -> ObserveError {
    ObserveError::Api {
        status: status.as_u16(),
        body,
    }
}

/// Encodes one path segment, e.g. an ORN dataset id.
pub fn path_segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}
