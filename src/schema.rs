use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{path_segment, ObserveClient};
use crate::error::Result;
use crate::model::{Column, ColumnClassification, ColumnType, Dataset};

/// 严重级别列候选名（小写精确匹配）。
pub const SEVERITY_CANDIDATES: &[&str] = &["severity", "severitytext", "level", "log_level", "loglevel"];

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "timestamp";

/// Outcome of a metadata fetch before the introspector decides how lenient to be.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaFetch {
    Columns(Vec<Column>),
    Degraded { reason: String },
}

impl SchemaFetch {
    pub fn into_columns(self) -> Vec<Column> {
        match self {
            SchemaFetch::Columns(cols) => cols,
            SchemaFetch::Degraded { .. } => Vec::new(),
        }
    }
}

// The dataset endpoint nests columns under `data.state` or directly under `state`.
#[derive(Debug, Deserialize)]
struct DatasetResponse {
    #[serde(default)]
    data: Option<DatasetData>,
    #[serde(default)]
    state: Option<DatasetState>,
}

#[derive(Debug, Deserialize)]
struct DatasetData {
    #[serde(default)]
    state: Option<DatasetState>,
}

#[derive(Debug, Deserialize)]
struct DatasetState {
    #[serde(default)]
    columns: Option<Vec<Column>>,
}

/// Extracts columns from a raw dataset document.
pub fn extract_columns(doc: &serde_json::Value) -> SchemaFetch {
    let parsed: DatasetResponse = match serde_json::from_value(doc.clone()) {
        Ok(p) => p,
        Err(e) => {
            return SchemaFetch::Degraded {
                reason: format!("unexpected dataset shape: {e}"),
            }
        }
    };
    let nested = parsed.data.and_then(|d| d.state).and_then(|s| s.columns);
    match nested.or_else(|| parsed.state.and_then(|s| s.columns)) {
        Some(cols) => SchemaFetch::Columns(cols),
        None => SchemaFetch::Degraded {
            reason: "dataset metadata carries no columns".into(),
        },
    }
}

#[derive(Clone)]
pub struct SchemaIntrospector {
    client: ObserveClient,
    strict: bool,
}

impl SchemaIntrospector {
    pub fn new(client: ObserveClient, strict: bool) -> Self {
        Self { client, strict }
    }

    pub async fn get_dataset_raw(&self, dataset_id: &str) -> Result<serde_json::Value> {
        let path = format!("/v1/dataset/{}", path_segment(dataset_id));
        Ok(self
            .client
            .get::<serde_json::Value>(&path, &[])
            .await?
            .unwrap_or(serde_json::Value::Null))
    }

    /// Transport failures stay `Err` here; shape problems become `Degraded`.
    pub async fn fetch(&self, dataset_id: &str) -> Result<SchemaFetch> {
        let doc = self.get_dataset_raw(dataset_id).await?;
        Ok(extract_columns(&doc))
    }

    /// 获取数据集列。非严格模式下任何失败都降级为空列表。
    pub async fn dataset(&self, dataset_id: &str) -> Result<Dataset> {
        let fetched = match self.fetch(dataset_id).await {
            Ok(f) => f,
            Err(e) if self.strict => return Err(e),
            Err(e) => SchemaFetch::Degraded {
                reason: e.to_string(),
            },
        };
        if let SchemaFetch::Degraded { reason } = &fetched {
            warn!(dataset_id, %reason, "schema unavailable, falling back to generic query");
        }
        let columns = fetched.into_columns();
        debug!(dataset_id, columns = columns.len(), "dataset schema fetched");
        Ok(Dataset {
            id: dataset_id.to_string(),
            columns,
        })
    }

    pub async fn classify(&self, dataset_id: &str) -> Result<ColumnClassification> {
        let dataset = self.dataset(dataset_id).await?;
        Ok(classify_columns(&dataset.columns))
    }
}

/// First column in declared order whose lowercased name is a candidate.
pub fn detect_severity_column(columns: &[Column]) -> Option<String> {
    columns
        .iter()
        .find(|c| SEVERITY_CANDIDATES.contains(&c.name.to_lowercase().as_str()))
        .map(|c| c.name.clone())
}

pub fn classify_columns(columns: &[Column]) -> ColumnClassification {
    let searchable_columns = columns
        .iter()
        .filter(|c| c.column_type == ColumnType::String)
        .map(|c| c.name.clone())
        .collect();
    let timestamp_column = columns
        .iter()
        .find(|c| c.column_type == ColumnType::Timestamp)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| DEFAULT_TIMESTAMP_COLUMN.to_string());
    ColumnClassification {
        searchable_columns,
        timestamp_column,
        severity_column: detect_severity_column(columns),
        known_columns: columns.iter().map(|c| c.name.clone()).collect(),
    }
}
