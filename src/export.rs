use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::client::{
    path_segment, EndpointClass, ObserveClient, RawResponse, CURSOR_ID_HEADER, NEXT_PAGE_HEADER,
    TOTAL_ROWS_HEADER,
};
use crate::config::PollConfig;
use crate::error::{ObserveError, Result};
use crate::model::{PageOutcome, PageRequest, Query, QueryOutcome, SubmitRequest, TimeWindow};

const EXPORT_QUERY_PATH: &str = "/v1/meta/export/query";
const EXPORT_PAGE_PATH: &str = "/v1/meta/export/query/page";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportBody<'a> {
    query: &'a Query,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_count: Option<&'a str>,
}

/// 提交查询并解释同步、异步受理和部分结果三种返回。
#[derive(Clone)]
pub struct QuerySubmitter {
    client: ObserveClient,
}

impl QuerySubmitter {
    pub fn new(client: ObserveClient) -> Self {
        Self { client }
    }

    pub async fn submit(&self, request: &SubmitRequest) -> Result<QueryOutcome> {
        request.query.validate()?;
        request.window.validate()?;

        let mut params = request.window.to_params();
        if let Some(stage) = &request.stage {
            params.push(("stage", stage.clone()));
        }
        if request.paginate {
            params.push(("paginate", "true".to_string()));
        }
        let body = ExportBody {
            query: &request.query,
            row_count: request.row_count.as_deref().filter(|r| !r.is_empty()),
        };

        let raw = self
            .client
            .post_raw(EXPORT_QUERY_PATH, &body, &params, EndpointClass::QuerySubmit)
            .await?;
        let outcome = submit_outcome(raw)?;
        match &outcome {
            QueryOutcome::Partial { .. } => warn!("query answered with partial results"),
            QueryOutcome::Accepted { cursor_id, .. } if cursor_id.is_empty() => {
                warn!("query accepted without a cursor header")
            }
            QueryOutcome::Accepted { cursor_id, .. } => info!(cursor_id, "query accepted"),
            QueryOutcome::Complete { body } => debug!(bytes = body.len(), "query complete"),
        }
        Ok(outcome)
    }

    /// Worksheet export shares the query export status semantics.
    pub async fn export_worksheet(
        &self,
        worksheet_id: &str,
        window: &TimeWindow,
        stage: Option<&str>,
    ) -> Result<QueryOutcome> {
        window.validate()?;
        let mut params = window.to_params();
        if let Some(stage) = stage {
            params.push(("stage", stage.to_string()));
        }
        let path = format!("/v1/meta/export/worksheet/{}", path_segment(worksheet_id));
        let raw = self
            .client
            .post_raw(&path, &serde_json::json!({}), &params, EndpointClass::QuerySubmit)
            .await?;
        submit_outcome(raw)
    }
}

pub fn submit_outcome(raw: RawResponse) -> Result<QueryOutcome> {
    match raw.status {
        200 | 201 => Ok(QueryOutcome::Complete { body: raw.body }),
        206 => Ok(QueryOutcome::Partial { body: raw.body }),
        202 => Ok(QueryOutcome::Accepted {
            cursor_id: raw.header(CURSOR_ID_HEADER).unwrap_or_default().to_string(),
            next_page_token: raw.header(NEXT_PAGE_HEADER).unwrap_or_default().to_string(),
        }),
        status => Err(ObserveError::Api {
            status,
            body: raw.body,
        }),
    }
}

pub fn page_outcome(raw: RawResponse) -> Result<PageOutcome> {
    match raw.status {
        202 => Ok(PageOutcome::InProgress {
            next_page_token: raw.header(NEXT_PAGE_HEADER).unwrap_or_default().to_string(),
        }),
        200 | 201 => {
            let next = raw.header(NEXT_PAGE_HEADER).map(str::to_string);
            let total_rows = raw
                .header(TOTAL_ROWS_HEADER)
                .and_then(|v| v.trim().parse::<u64>().ok());
            Ok(PageOutcome::Done {
                body: raw.body,
                total_rows,
                has_more: next.is_some(),
                next_page_token: next,
            })
        }
        status => Err(ObserveError::Api {
            status,
            body: raw.body,
        }),
    }
}

/// Upper bounds for [`CursorPaginator::poll_until_done`].
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub max_attempts: u32,
    pub max_elapsed: Option<Duration>,
    pub retry_delay: Duration,
}

impl From<&PollConfig> for PollBudget {
    fn from(cfg: &PollConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            max_elapsed: cfg.max_elapsed_secs.map(Duration::from_secs),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

#[derive(Clone)]
pub struct CursorPaginator {
    client: ObserveClient,
}

impl CursorPaginator {
    pub fn new(client: ObserveClient) -> Self {
        Self { client }
    }

    /// 单次长轮询；后端可能挂起连接直到结果就绪。
    pub async fn poll(&self, request: &PageRequest) -> Result<PageOutcome> {
        if request.cursor_id.trim().is_empty() {
            return Err(ObserveError::InvalidRequest("cursorId is required".into()));
        }
        let mut params = vec![("cursorId", request.cursor_id.clone())];
        if let Some(offset) = &request.offset {
            params.push(("offset", offset.clone()));
        }
        if let Some(num_rows) = &request.num_rows {
            params.push(("numRows", num_rows.clone()));
        }
        let raw = self
            .client
            .get_raw(EXPORT_PAGE_PATH, &params, EndpointClass::QueryPage)
            .await?;
        page_outcome(raw)
    }

    /// Polls until `Done`, never more than `max_attempts` times and never past
    /// `max_elapsed`. Dropping the future stops polling.
    pub async fn poll_until_done(
        &self,
        request: &PageRequest,
        budget: PollBudget,
    ) -> Result<PageOutcome> {
        if budget.max_elapsed.is_some_and(|limit| limit.is_zero()) {
            return Err(ObserveError::InvalidRequest(
                "max_elapsed must be greater than zero".into(),
            ));
        }
        let started = Instant::now();
        let max_attempts = budget.max_attempts.max(1);
        let mut attempts = 0u32;

        while attempts < max_attempts {
            let remaining = match budget.max_elapsed {
                Some(limit) => match limit.checked_sub(started.elapsed()) {
                    Some(r) if !r.is_zero() => Some(r),
                    _ => break,
                },
                None => None,
            };
            attempts += 1;

            let outcome = match remaining {
                Some(r) => match timeout(r, self.poll(request)).await {
                    Ok(res) => res?,
                    Err(_) => break,
                },
                None => self.poll(request).await?,
            };
            if outcome.is_done() {
                info!(cursor_id = %request.cursor_id, attempts, "cursor page ready");
                return Ok(outcome);
            }
            debug!(cursor_id = %request.cursor_id, attempts, "cursor still in progress");

            if attempts < max_attempts && !budget.retry_delay.is_zero() {
                // 等待不得越过剩余时间预算
                let delay = match budget.max_elapsed {
                    Some(limit) => budget
                        .retry_delay
                        .min(limit.saturating_sub(started.elapsed())),
                    None => budget.retry_delay,
                };
                sleep(delay).await;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        warn!(cursor_id = %request.cursor_id, attempts, elapsed_ms, "poll budget exhausted");
        Err(ObserveError::PollTimeout {
            cursor_id: request.cursor_id.clone(),
            attempts,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn raw(status: u16, body: &str, headers: &[(&'static str, &str)]) -> RawResponse {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        RawResponse {
            status,
            body: body.to_string(),
            headers: map,
        }
    }

    #[test]
    fn submit_status_mapping() {
        assert_eq!(
            submit_outcome(raw(200, "{}", &[])).unwrap(),
            QueryOutcome::Complete { body: "{}".into() }
        );
        assert!(submit_outcome(raw(206, "{}", &[])).unwrap().is_partial());

        let accepted = submit_outcome(raw(
            202,
            "",
            &[(CURSOR_ID_HEADER, "cur-1"), (NEXT_PAGE_HEADER, "p2")],
        ))
        .unwrap();
        assert_eq!(
            accepted,
            QueryOutcome::Accepted {
                cursor_id: "cur-1".into(),
                next_page_token: "p2".into()
            }
        );

        let no_cursor = submit_outcome(raw(202, "", &[])).unwrap();
        assert!(!no_cursor.has_cursor());

        assert!(matches!(
            submit_outcome(raw(500, "boom", &[])),
            Err(ObserveError::Api { status: 500, .. })
        ));
    }

    #[test]
    fn page_has_more_depends_on_header_presence() {
        let done = page_outcome(raw(200, "{}", &[(TOTAL_ROWS_HEADER, "42")])).unwrap();
        assert_eq!(
            done,
            PageOutcome::Done {
                body: "{}".into(),
                total_rows: Some(42),
                has_more: false,
                next_page_token: None
            }
        );

        // an explicit "false" value still counts as a next page
        let more = page_outcome(raw(200, "", &[(NEXT_PAGE_HEADER, "false")])).unwrap();
        assert!(matches!(more, PageOutcome::Done { has_more: true, total_rows: None, .. }));

        let waiting = page_outcome(raw(202, "", &[])).unwrap();
        assert_eq!(
            waiting,
            PageOutcome::InProgress {
                next_page_token: String::new()
            }
        );

        assert!(page_outcome(raw(206, "", &[])).is_err());
    }

    #[test]
    fn budget_from_config() {
        let b = PollBudget::from(&PollConfig::default());
        assert_eq!(b.max_attempts, 10);
        assert_eq!(b.max_elapsed, Some(Duration::from_secs(300)));
        assert_eq!(b.retry_delay, Duration::from_millis(1000));
    }
}
