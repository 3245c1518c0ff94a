use thiserror::Error;

pub type Result<T> = std::result::Result<T, ObserveError>;

#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 后端返回了该端点不接受的状态码，原始响应体保留。
    #[error("Observe API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("响应解析失败: {0}")]
    Decode(String),

    #[error(
        "no severity-like column found in dataset {dataset_id}; known columns: [{}]. \
         Pick a column manually and use execute_opal_query instead",
        .columns.join(", ")
    )]
    NoSeverityColumn {
        dataset_id: String,
        columns: Vec<String>,
    },

    #[error("轮询超时: cursor {cursor_id} still in progress after {attempts} attempts ({elapsed_ms} ms)")]
    PollTimeout {
        cursor_id: String,
        attempts: u32,
        elapsed_ms: u64,
    },

    #[error("无效请求: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ObserveError {
    fn from(e: reqwest::Error) -> Self {
        ObserveError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ObserveError {
    fn from(e: serde_json::Error) -> Self {
        ObserveError::Decode(e.to_string())
    }
}
