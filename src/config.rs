use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ObserveError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    pub http_addr: Option<String>,
    pub http_port: Option<u16>,
}

/// Observe 租户连接信息。构造客户端时显式传入，运行期间不再读取环境变量。
#[derive(Clone, Serialize, Deserialize)]
pub struct ObserveConfig {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Overrides `https://{instance}.{domain}.com`, mostly for proxies and tests.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            customer_id: String::new(),
            api_token: String::new(),
            instance: String::new(),
            domain: default_domain(),
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for ObserveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveConfig")
            .field("customer_id", &self.customer_id)
            .field("api_token", &"<redacted>")
            .field("instance", &self.instance)
            .field("domain", &self.domain)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ObserveConfig {
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("https://{}.{}.com", self.instance, self.domain),
        }
    }

    pub fn auth_header(&self) -> String {
        format!("Bearer {} {}", self.customer_id, self.api_token)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.customer_id.is_empty() {
            return Err(ObserveError::ConfigError(
                "OBSERVE_CUSTOMER_ID / observe.customer_id is required".into(),
            ));
        }
        if self.api_token.is_empty() {
            return Err(ObserveError::ConfigError(
                "OBSERVE_API_TOKEN / observe.api_token is required".into(),
            ));
        }
        let has_base = self.base_url.as_deref().is_some_and(|u| !u.is_empty());
        if self.instance.is_empty() && !has_base {
            return Err(ObserveError::ConfigError(
                "OBSERVE_INSTANCE / observe.instance is required (your org subdomain, e.g. 'acme' from https://acme.observeinc.com)".into(),
            ));
        }
        Ok(())
    }
}

/// 便捷查询的默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_interval")]
    pub default_interval: String,
    #[serde(default = "default_search_limit")]
    pub search_limit: u64,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u64,
    #[serde(default = "default_severity_levels")]
    pub severity_levels: Vec<String>,
    /// When set, a failed metadata fetch is reported instead of degrading to an
    /// empty column list.
    #[serde(default)]
    pub strict_schema: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_interval: default_interval(),
            search_limit: default_search_limit(),
            recent_limit: default_recent_limit(),
            severity_levels: default_severity_levels(),
            strict_schema: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: Option<u64>,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_elapsed_secs: default_max_elapsed_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observe: ObserveConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

impl Config {
    /// 从 YAML 或 JSON 文件加载配置，随后应用环境变量覆盖。
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ObserveError::ConfigError(format!("read {} failed: {e}", path.display()))
        })?;
        let mut cfg = Self::parse(&raw, path)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.observe.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.observe.validate()?;
        Ok(cfg)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(raw)
                .map_err(|e| ObserveError::ConfigError(format!("invalid json config: {e}")))
        } else {
            serde_yaml::from_str(raw)
                .map_err(|e| ObserveError::ConfigError(format!("invalid yaml config: {e}")))
        }
    }

    /// Non-empty variables win over file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = get("OBSERVE_CUSTOMER_ID") {
            self.observe.customer_id = v;
        }
        if let Some(v) = get("OBSERVE_API_TOKEN") {
            self.observe.api_token = v;
        }
        if let Some(v) = get("OBSERVE_INSTANCE") {
            self.observe.instance = v;
        }
        if let Some(v) = get("OBSERVE_DOMAIN") {
            self.observe.domain = v;
        }
        if let Some(v) = get("OBSERVE_BASE_URL") {
            self.observe.base_url = Some(v);
        }
    }
}

fn default_domain() -> String {
    "observeinc".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_search_limit() -> u64 {
    100
}

fn default_recent_limit() -> u64 {
    25
}

fn default_severity_levels() -> Vec<String> {
    ["error", "warning", "critical", "fatal"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_max_elapsed_secs() -> Option<u64> {
    Some(300)
}

fn default_retry_delay_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn yaml_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("observe.yaml");
        std::fs::write(
            &path,
            "observe:\n  customer_id: \"123\"\n  api_token: tok\n  instance: acme\nserver:\n  mode: both\n",
        )
        .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let cfg = Config::parse(&raw, &path).unwrap();
        assert_eq!(cfg.server.mode, ServerMode::Both);
        assert_eq!(cfg.observe.domain, "observeinc");
        assert_eq!(cfg.observe.base_url(), "https://acme.observeinc.com");
        assert_eq!(cfg.query.search_limit, 100);
        assert_eq!(cfg.query.recent_limit, 25);
        assert_eq!(cfg.query.severity_levels.len(), 4);
        assert_eq!(cfg.poll.max_attempts, 10);
        assert!(cfg.observe.validate().is_ok());
    }

    #[test]
    fn json_config_is_detected_by_extension() {
        let path = Path::new("observe.json");
        let raw = r#"{"observe": {"customer_id": "1", "api_token": "t", "base_url": "http://localhost:9/"}}"#;
        let cfg = Config::parse(raw, path).unwrap();
        assert_eq!(cfg.observe.base_url(), "http://localhost:9");
        assert_eq!(cfg.server.mode, ServerMode::Stdio);
        assert!(cfg.observe.validate().is_ok());
    }

    #[test]
    fn env_overrides_and_validation() {
        let mut cfg = Config::default();
        assert!(cfg.observe.validate().is_err());

        let vars: HashMap<&str, &str> = [
            ("OBSERVE_CUSTOMER_ID", "42"),
            ("OBSERVE_API_TOKEN", "secret"),
            ("OBSERVE_INSTANCE", "acme"),
            ("OBSERVE_DOMAIN", ""),
        ]
        .into_iter()
        .collect();
        cfg.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.observe.customer_id, "42");
        assert_eq!(cfg.observe.domain, "observeinc");
        assert_eq!(cfg.observe.auth_header(), "Bearer 42 secret");
        assert!(cfg.observe.validate().is_ok());
    }

    #[test]
    fn debug_output_hides_token() {
        let cfg = ObserveConfig {
            api_token: "super-secret".into(),
            ..ObserveConfig::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
