use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ObserveError, Result};

/// 列类型。未识别的类型原样保留。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    String,
    Timestamp,
    Int64,
    Float64,
    Bool,
    Duration,
    Object,
    Array,
    Other(String),
}

impl From<String> for ColumnType {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "string" => ColumnType::String,
            "timestamp" => ColumnType::Timestamp,
            "int64" => ColumnType::Int64,
            "float64" => ColumnType::Float64,
            "bool" => ColumnType::Bool,
            "duration" => ColumnType::Duration,
            "object" => ColumnType::Object,
            "array" => ColumnType::Array,
            _ => ColumnType::Other(raw),
        }
    }
}

impl From<ColumnType> for String {
    fn from(t: ColumnType) -> Self {
        match t {
            ColumnType::String => "string".into(),
            ColumnType::Timestamp => "timestamp".into(),
            ColumnType::Int64 => "int64".into(),
            ColumnType::Float64 => "float64".into(),
            ColumnType::Bool => "bool".into(),
            ColumnType::Duration => "duration".into(),
            ColumnType::Object => "object".into(),
            ColumnType::Array => "array".into(),
            ColumnType::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::from(column_type.into()),
        }
    }
}

/// 单次操作内获取的数据集快照，不跨调用缓存。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInput {
    pub input_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_path: Option<String>,
    /// References another stage of the same query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_role: Option<String>,
}

impl StageInput {
    pub fn dataset(input_name: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            input_name: input_name.into(),
            dataset_id: Some(dataset_id.into()),
            dataset_path: None,
            stage_id: None,
            input_role: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(rename = "stageID")]
    pub stage_id: String,
    #[serde(rename = "input", default)]
    pub inputs: Vec<StageInput>,
    pub pipeline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub output_stage: String,
    pub stages: Vec<Stage>,
}

impl Query {
    /// Single stage `main` reading one dataset.
    pub fn single_stage(dataset_id: &str, pipeline: String) -> Self {
        Self {
            output_stage: "main".to_string(),
            stages: vec![Stage {
                stage_id: "main".to_string(),
                inputs: vec![StageInput::dataset("main", dataset_id)],
                pipeline,
            }],
        }
    }

    /// outputStage 必须存在，且每个 stage 都能（直接或间接）流入 outputStage。
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(ObserveError::InvalidRequest("query has no stages".into()));
        }
        let mut by_id: HashMap<&str, &Stage> = HashMap::new();
        for stage in &self.stages {
            if by_id.insert(stage.stage_id.as_str(), stage).is_some() {
                return Err(ObserveError::InvalidRequest(format!(
                    "duplicate stageID: {}",
                    stage.stage_id
                )));
            }
        }
        if !by_id.contains_key(self.output_stage.as_str()) {
            return Err(ObserveError::InvalidRequest(format!(
                "outputStage {} does not name a stage",
                self.output_stage
            )));
        }

        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([self.output_stage.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !reached.insert(id) {
                continue;
            }
            let Some(stage) = by_id.get(id) else {
                return Err(ObserveError::InvalidRequest(format!(
                    "stage input references unknown stage: {id}"
                )));
            };
            for input in &stage.inputs {
                if let Some(upstream) = input.stage_id.as_deref() {
                    queue.push_back(upstream);
                }
            }
        }

        let orphans: Vec<&str> = self
            .stages
            .iter()
            .map(|s| s.stage_id.as_str())
            .filter(|id| !reached.contains(id))
            .collect();
        if !orphans.is_empty() {
            return Err(ObserveError::InvalidRequest(format!(
                "stages not reachable from outputStage {}: {}",
                self.output_stage,
                orphans.join(", ")
            )));
        }
        Ok(())
    }
}

/// 时间窗口：绝对区间、相对 interval，或二者皆无。以查询参数发送，不放入 body。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    #[serde(default, alias = "start_time")]
    pub start_time: Option<String>,
    #[serde(default, alias = "end_time")]
    pub end_time: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

impl TimeWindow {
    pub fn relative(interval: impl Into<String>) -> Self {
        Self {
            start_time: None,
            end_time: None,
            interval: Some(interval.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("startTime", &self.start_time), ("endTime", &self.end_time)] {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                normalize_timestamp(v).map_err(|e| {
                    ObserveError::InvalidRequest(format!("{name} is not ISO 8601 ({v}): {e}"))
                })?;
            }
        }
        if let Some(v) = self.interval.as_deref().filter(|v| !v.is_empty()) {
            if !interval_regex().is_match(v) {
                return Err(ObserveError::InvalidRequest(format!(
                    "interval must look like 10m, 1h or 1h30m, got {v}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(v) = &self.start_time {
            params.push(("startTime", normalize_timestamp(v).unwrap_or_else(|_| v.clone())));
        }
        if let Some(v) = &self.end_time {
            params.push(("endTime", normalize_timestamp(v).unwrap_or_else(|_| v.clone())));
        }
        if let Some(v) = &self.interval {
            params.push(("interval", v.clone()));
        }
        params
    }
}

/// RFC 3339 passes through unchanged; an ISO 8601 local time without offset
/// is read as UTC and rewritten with a `Z` suffix.
fn normalize_timestamp(raw: &str) -> std::result::Result<String, chrono::ParseError> {
    if DateTime::parse_from_rfc3339(raw).is_ok() {
        return Ok(raw.to_string());
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")?;
    Ok(naive.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn interval_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(ns|us|ms|s|m|h|d|w))+$").expect("static interval regex"))
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub query: Query,
    pub window: TimeWindow,
    pub stage: Option<String>,
    pub paginate: bool,
    pub row_count: Option<String>,
}

impl SubmitRequest {
    pub fn new(query: Query, window: TimeWindow) -> Self {
        Self {
            query,
            window,
            stage: None,
            paginate: false,
            row_count: None,
        }
    }
}

pub const PARTIAL_RESULT_MARKER: &str =
    "[Partial results - dataset not fully accelerated for requested window]";

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Complete { body: String },
    Partial { body: String },
    Accepted { cursor_id: String, next_page_token: String },
}

impl QueryOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self, QueryOutcome::Partial { .. })
    }

    /// 空 cursor 头表示没有可用游标。
    pub fn has_cursor(&self) -> bool {
        matches!(self, QueryOutcome::Accepted { cursor_id, .. } if !cursor_id.is_empty())
    }

    pub fn render(&self) -> String {
        match self {
            QueryOutcome::Complete { body } => body.clone(),
            QueryOutcome::Partial { body } => format!("{PARTIAL_RESULT_MARKER}\n{body}"),
            QueryOutcome::Accepted {
                cursor_id,
                next_page_token,
            } => {
                let message = if cursor_id.is_empty() {
                    "Query accepted but the backend returned no cursor; results cannot be paged."
                } else {
                    "Query accepted. Use get_query_page with the cursorId to fetch results."
                };
                pretty(&serde_json::json!({
                    "status": "paginated",
                    "cursorId": cursor_id,
                    "nextPage": next_page_token,
                    "message": message,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(alias = "cursor_id")]
    pub cursor_id: String,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default, alias = "num_rows")]
    pub num_rows: Option<String>,
}

impl PageRequest {
    pub fn new(cursor_id: impl Into<String>) -> Self {
        Self {
            cursor_id: cursor_id.into(),
            offset: None,
            num_rows: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    InProgress {
        next_page_token: String,
    },
    Done {
        body: String,
        total_rows: Option<u64>,
        has_more: bool,
        next_page_token: Option<String>,
    },
}

impl PageOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, PageOutcome::Done { .. })
    }

    pub fn render(&self) -> String {
        match self {
            PageOutcome::InProgress { next_page_token } => pretty(&serde_json::json!({
                "status": "in_progress",
                "nextPage": next_page_token,
                "message": "Query still executing. Retry this call to continue polling.",
            })),
            PageOutcome::Done {
                body,
                total_rows,
                has_more,
                ..
            } => {
                let total = total_rows
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let more = if *has_more {
                    "Next page available"
                } else {
                    "No more pages"
                };
                format!("[Total rows: {total} | {more}]\n{body}")
            }
        }
    }
}

/// 数据集列的派生视图，不持久化。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnClassification {
    pub searchable_columns: Vec<String>,
    pub timestamp_column: String,
    pub severity_column: Option<String>,
    pub known_columns: Vec<String>,
}

/// Parses each non-empty line on its own; the error names the 1-based line.
pub fn parse_ndjson(body: &str) -> Result<Vec<Value>> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|e| ObserveError::Decode(format!("ndjson line {}: {e}", idx + 1)))
        })
        .collect()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
