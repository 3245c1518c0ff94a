use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::ObserveClient;
use crate::config::Config;
use crate::error::{ObserveError, Result};
use crate::export::{CursorPaginator, PollBudget, QuerySubmitter};
use crate::model::{PageRequest, Query, QueryOutcome, Stage, SubmitRequest, TimeWindow};
use crate::schema::SchemaIntrospector;
use crate::synth::{synthesize, Intent};

/// Tool engine: introspection, synthesis, submission and paging behind MCP tool names.
#[derive(Clone)]
pub struct ToolEngine {
    client: ObserveClient,
    introspector: SchemaIntrospector,
    submitter: QuerySubmitter,
    paginator: CursorPaginator,
    config: Config,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![ToolContent { kind: "text", text }],
            is_error: false,
        }
    }

    pub fn error(err: &ObserveError) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text",
                text: err.to_string(),
            }],
            is_error: true,
        }
    }

    pub fn first_text(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDatasetsArgs {
    pub workspace_id: Option<String>,
    #[serde(rename = "match")]
    pub match_: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub interface: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetArgs {
    pub dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQueryArgs {
    pub stages: Vec<Stage>,
    pub output_stage: String,
    #[serde(flatten)]
    pub window: TimeWindow,
    #[serde(default, deserialize_with = "string_or_number")]
    pub row_count: Option<String>,
    #[serde(default)]
    pub paginate: bool,
    pub stage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageArgs {
    pub cursor_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub offset: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub num_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitPageArgs {
    #[serde(flatten)]
    pub page: PageArgs,
    pub max_attempts: Option<u32>,
    pub max_elapsed_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorksheetArgs {
    #[serde(alias = "worksheet_id")]
    pub worksheet_id: String,
    #[serde(flatten)]
    pub window: TimeWindow,
    pub stage: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub dataset_id: String,
    pub keyword: String,
    pub interval: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorCountArgs {
    pub dataset_id: String,
    pub group_by: String,
    pub severity_levels: Option<Vec<String>>,
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentArgs {
    pub dataset_id: String,
    pub limit: Option<u64>,
    pub interval: Option<String>,
}

fn string_or_number<'de, D>(de: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(de)?;
    Ok(match v {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ObserveError::InvalidRequest(format!("invalid params: {e}")))
}

impl ToolEngine {
    pub fn new(config: Config) -> Result<Self> {
        let client = ObserveClient::new(&config.observe)?;
        Ok(Self {
            introspector: SchemaIntrospector::new(client.clone(), config.query.strict_schema),
            submitter: QuerySubmitter::new(client.clone()),
            paginator: CursorPaginator::new(client.clone()),
            client,
            config,
        })
    }

    pub fn introspector(&self) -> &SchemaIntrospector {
        &self.introspector
    }

    pub fn submitter(&self) -> &QuerySubmitter {
        &self.submitter
    }

    pub fn paginator(&self) -> &CursorPaginator {
        &self.paginator
    }

    /// 按工具名分发；失败以 `is_error` 结果返回，而不是 RPC 错误。
    pub async fn call(&self, name: &str, args: Value) -> Option<ToolResult> {
        let result = match name {
            "list_datasets" => self.list_datasets(parse_args(args)).await,
            "get_dataset" => self.get_dataset(parse_args(args)).await,
            "execute_opal_query" => self.execute_opal_query(parse_args(args)).await,
            "get_query_page" => self.get_query_page(parse_args(args)).await,
            "wait_for_query_page" => self.wait_for_query_page(parse_args(args)).await,
            "export_worksheet" => self.export_worksheet(parse_args(args)).await,
            "search_logs" => self.search_logs(parse_args(args)).await,
            "get_error_counts" => self.get_error_counts(parse_args(args)).await,
            "get_recent_observations" => self.get_recent_observations(parse_args(args)).await,
            _ => return None,
        };
        debug!(tool = name, ok = result.is_ok(), "tool call finished");
        Some(match result {
            Ok(text) => ToolResult::text(text),
            Err(e) => ToolResult::error(&e),
        })
    }

    async fn list_datasets(&self, args: Result<ListDatasetsArgs>) -> Result<String> {
        let args = args?;
        let params: Vec<(&str, String)> = [
            ("workspaceId", args.workspace_id),
            ("match", args.match_),
            ("name", args.name),
            ("type", args.kind),
            ("interface", args.interface),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();
        let result: Option<Value> = self.client.get("/v1/dataset", &params).await?;
        Ok(pretty(&result.unwrap_or(Value::Null)))
    }

    async fn get_dataset(&self, args: Result<DatasetArgs>) -> Result<String> {
        let args = args?;
        let doc = self.introspector.get_dataset_raw(&args.dataset_id).await?;
        Ok(pretty(&doc))
    }

    async fn execute_opal_query(&self, args: Result<ExecuteQueryArgs>) -> Result<String> {
        let args = args?;
        let request = SubmitRequest {
            query: Query {
                output_stage: args.output_stage,
                stages: args.stages,
            },
            window: args.window,
            stage: args.stage,
            paginate: args.paginate,
            row_count: args.row_count,
        };
        Ok(self.submitter.submit(&request).await?.render())
    }

    async fn get_query_page(&self, args: Result<PageArgs>) -> Result<String> {
        let request = page_request(args?);
        Ok(self.paginator.poll(&request).await?.render())
    }

    async fn wait_for_query_page(&self, args: Result<WaitPageArgs>) -> Result<String> {
        let args = args?;
        let mut budget = PollBudget::from(&self.config.poll);
        if let Some(n) = args.max_attempts {
            budget.max_attempts = n;
        }
        if let Some(secs) = args.max_elapsed_secs {
            budget.max_elapsed = Some(std::time::Duration::from_secs(secs));
        }
        if let Some(ms) = args.retry_delay_ms {
            budget.retry_delay = std::time::Duration::from_millis(ms);
        }
        let request = page_request(args.page);
        Ok(self.paginator.poll_until_done(&request, budget).await?.render())
    }

    async fn export_worksheet(&self, args: Result<WorksheetArgs>) -> Result<String> {
        let args = args?;
        let outcome = self
            .submitter
            .export_worksheet(&args.worksheet_id, &args.window, args.stage.as_deref())
            .await?;
        Ok(outcome.render())
    }

    async fn search_logs(&self, args: Result<SearchArgs>) -> Result<String> {
        let args = args?;
        let intent = Intent::Search {
            keyword: args.keyword,
            limit: args.limit.unwrap_or(self.config.query.search_limit),
        };
        self.run_intent(&args.dataset_id, args.interval, intent).await
    }

    async fn get_error_counts(&self, args: Result<ErrorCountArgs>) -> Result<String> {
        let args = args?;
        let intent = Intent::ErrorCounts {
            group_by: args.group_by,
            severity_levels: args
                .severity_levels
                .unwrap_or_else(|| self.config.query.severity_levels.clone()),
        };
        self.run_intent(&args.dataset_id, args.interval, intent).await
    }

    async fn get_recent_observations(&self, args: Result<RecentArgs>) -> Result<String> {
        let args = args?;
        let intent = Intent::Recent {
            limit: args.limit.unwrap_or(self.config.query.recent_limit),
        };
        self.run_intent(&args.dataset_id, args.interval, intent).await
    }

    /// Schema is fetched fresh for every call.
    pub async fn run_intent(
        &self,
        dataset_id: &str,
        interval: Option<String>,
        intent: Intent,
    ) -> Result<String> {
        Ok(self.submit_intent(dataset_id, interval, intent).await?.render())
    }

    pub async fn submit_intent(
        &self,
        dataset_id: &str,
        interval: Option<String>,
        intent: Intent,
    ) -> Result<QueryOutcome> {
        if dataset_id.trim().is_empty() {
            return Err(ObserveError::InvalidRequest("dataset_id is required".into()));
        }
        let columns = self.introspector.classify(dataset_id).await?;
        let query = synthesize(dataset_id, &columns, &intent)?;
        debug!(dataset_id, pipeline = %query.stages[0].pipeline, "synthesized query");
        let interval = interval
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| self.config.query.default_interval.clone());
        let request = SubmitRequest::new(query, TimeWindow::relative(interval));
        self.submitter.submit(&request).await
    }
}

fn page_request(args: PageArgs) -> PageRequest {
    PageRequest {
        cursor_id: args.cursor_id,
        offset: args.offset,
        num_rows: args.num_rows,
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// MCP `tools/list` 描述。
pub fn tool_definitions() -> Vec<Value> {
    use serde_json::json;

    let window = json!({
        "startTime": { "type": "string", "description": "Start of time window (ISO 8601; no offset means UTC)" },
        "endTime": { "type": "string", "description": "End of time window (ISO 8601; no offset means UTC)" },
        "interval": { "type": "string", "description": "Window length relative to now, e.g. '10m', '1h'" }
    });
    let with_window = |mut props: Value| {
        if let (Some(p), Some(w)) = (props.as_object_mut(), window.as_object()) {
            for (k, v) in w {
                p.insert(k.clone(), v.clone());
            }
        }
        props
    };

    vec![
        json!({
            "name": "list_datasets",
            "description": "List datasets, optionally filtered by workspace, name, type or interface.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "workspaceId": { "type": "string" },
                    "match": { "type": "string" },
                    "name": { "type": "string" },
                    "type": { "type": "string" },
                    "interface": { "type": "string" }
                }
            }
        }),
        json!({
            "name": "get_dataset",
            "description": "Get a dataset by ID, including its columns.",
            "inputSchema": {
                "type": "object",
                "required": ["dataset_id"],
                "properties": { "dataset_id": { "type": "string" } }
            }
        }),
        json!({
            "name": "execute_opal_query",
            "description": "Execute an OPAL query. Returns NDJSON. With paginate=true returns a cursor for get_query_page.",
            "inputSchema": {
                "type": "object",
                "required": ["stages", "outputStage"],
                "properties": with_window(json!({
                    "stages": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["stageID", "input", "pipeline"],
                            "properties": {
                                "stageID": { "type": "string" },
                                "input": { "type": "array", "items": { "type": "object" } },
                                "pipeline": { "type": "string" }
                            }
                        }
                    },
                    "outputStage": { "type": "string" },
                    "rowCount": { "type": "string" },
                    "paginate": { "type": "boolean" },
                    "stage": { "type": "string" }
                }))
            }
        }),
        json!({
            "name": "get_query_page",
            "description": "Fetch one page of a paginated query (long poll, up to 30s). Retry while in progress.",
            "inputSchema": {
                "type": "object",
                "required": ["cursorId"],
                "properties": {
                    "cursorId": { "type": "string" },
                    "offset": { "type": "string" },
                    "numRows": { "type": "string" }
                }
            }
        }),
        json!({
            "name": "wait_for_query_page",
            "description": "Poll a cursor until its page is ready, within an attempt and time budget.",
            "inputSchema": {
                "type": "object",
                "required": ["cursorId"],
                "properties": {
                    "cursorId": { "type": "string" },
                    "offset": { "type": "string" },
                    "numRows": { "type": "string" },
                    "maxAttempts": { "type": "integer" },
                    "maxElapsedSecs": { "type": "integer" },
                    "retryDelayMs": { "type": "integer" }
                }
            }
        }),
        json!({
            "name": "export_worksheet",
            "description": "Export data from a saved worksheet by ID. Returns NDJSON.",
            "inputSchema": {
                "type": "object",
                "required": ["worksheet_id"],
                "properties": with_window(json!({
                    "worksheet_id": { "type": "string" },
                    "stage": { "type": "string" }
                }))
            }
        }),
        json!({
            "name": "search_logs",
            "description": "Search a dataset for a keyword across its string columns (all fields if the schema is unknown).",
            "inputSchema": {
                "type": "object",
                "required": ["dataset_id", "keyword"],
                "properties": {
                    "dataset_id": { "type": "string" },
                    "keyword": { "type": "string" },
                    "interval": { "type": "string" },
                    "limit": { "type": "integer" }
                }
            }
        }),
        json!({
            "name": "get_error_counts",
            "description": "Count rows by severity level grouped by a field, using the dataset's severity-like column.",
            "inputSchema": {
                "type": "object",
                "required": ["dataset_id", "group_by"],
                "properties": {
                    "dataset_id": { "type": "string" },
                    "group_by": { "type": "string" },
                    "severity_levels": { "type": "array", "items": { "type": "string" } },
                    "interval": { "type": "string" }
                }
            }
        }),
        json!({
            "name": "get_recent_observations",
            "description": "Most recent rows of a dataset, sorted by its timestamp column descending.",
            "inputSchema": {
                "type": "object",
                "required": ["dataset_id"],
                "properties": {
                    "dataset_id": { "type": "string" },
                    "limit": { "type": "integer" },
                    "interval": { "type": "string" }
                }
            }
        }),
    ]
}
