//! OPAL pipeline synthesis for the convenience intents.

use crate::error::{ObserveError, Result};
use crate::model::{ColumnClassification, Query};

/// Escape for embedding inside a double-quoted OPAL string literal.
pub fn escape_opal_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Column reference for a pipeline: bare identifiers stay bare, anything
/// else becomes a quoted `@."name"` field access.
pub fn column_ref(name: &str) -> String {
    let mut chars = name.chars();
    let bare = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if bare {
        name.to_string()
    } else {
        format!("@.\"{}\"", escape_opal_string(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Search {
        keyword: String,
        limit: u64,
    },
    ErrorCounts {
        group_by: String,
        severity_levels: Vec<String>,
    },
    Recent {
        limit: u64,
    },
}

pub fn search_pipeline(columns: &ColumnClassification, keyword: &str, limit: u64) -> String {
    let kw = escape_opal_string(keyword);
    let filter = if columns.searchable_columns.is_empty() {
        format!("contains(string(FIELDS), \"{kw}\")")
    } else {
        columns
            .searchable_columns
            .iter()
            .map(|c| format!("contains(string({}), \"{kw}\")", column_ref(c)))
            .collect::<Vec<_>>()
            .join(" or ")
    };
    format!("filter {filter}\nlimit {limit}")
}

/// 没有严重级别列时不猜测，返回列出全部已知列名的错误。
pub fn error_counts_pipeline(
    dataset_id: &str,
    columns: &ColumnClassification,
    group_by: &str,
    severity_levels: &[String],
) -> Result<String> {
    let Some(severity) = &columns.severity_column else {
        return Err(ObserveError::NoSeverityColumn {
            dataset_id: dataset_id.to_string(),
            columns: columns.known_columns.clone(),
        });
    };
    let group_by = group_by.trim();
    if group_by.is_empty() {
        return Err(ObserveError::InvalidRequest("group_by must not be empty".into()));
    }
    if severity_levels.is_empty() {
        return Err(ObserveError::InvalidRequest(
            "severity_levels must not be empty".into(),
        ));
    }
    let severity = column_ref(severity);
    let group_by = column_ref(group_by);
    let levels = severity_levels
        .iter()
        .map(|l| format!("\"{}\"", escape_opal_string(l)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "filter {severity} in ({levels})\nstatsby count:count(1), group_by({group_by})"
    ))
}

pub fn recent_pipeline(columns: &ColumnClassification, limit: u64) -> String {
    format!(
        "sort desc({})\nlimit {limit}",
        column_ref(&columns.timestamp_column)
    )
}

pub fn synthesize(dataset_id: &str, columns: &ColumnClassification, intent: &Intent) -> Result<Query> {
    let pipeline = match intent {
        Intent::Search { keyword, limit } => search_pipeline(columns, keyword, *limit),
        Intent::ErrorCounts {
            group_by,
            severity_levels,
        } => error_counts_pipeline(dataset_id, columns, group_by, severity_levels)?,
        Intent::Recent { limit } => recent_pipeline(columns, *limit),
    };
    Ok(Query::single_stage(dataset_id, pipeline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;
    use crate::schema::classify_columns;

    fn classified(cols: &[(&str, &str)]) -> ColumnClassification {
        let cols: Vec<Column> = cols.iter().map(|(n, t)| Column::new(*n, *t)).collect();
        classify_columns(&cols)
    }

    #[test]
    fn escaping_neutralises_quotes_and_backslashes() {
        let escaped = escape_opal_string(r#"say "hi"\"#);
        assert_eq!(escaped, r#"say \"hi\"\\"#);

        // every quote in the escaped text is preceded by an odd run of backslashes
        let bytes = escaped.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if *b == b'"' {
                let run = bytes[..i].iter().rev().take_while(|c| **c == b'\\').count();
                assert_eq!(run % 2, 1, "unescaped quote at {i}");
            }
        }
        let trailing = bytes.iter().rev().take_while(|c| **c == b'\\').count();
        assert_eq!(trailing % 2, 0);
    }

    #[test]
    fn column_ref_quotes_non_identifiers() {
        assert_eq!(column_ref("message"), "message");
        assert_eq!(column_ref("_ts2"), "_ts2");
        assert_eq!(column_ref("Log Message"), r#"@."Log Message""#);
        assert_eq!(column_ref("2xx"), r#"@."2xx""#);
        assert_eq!(column_ref("k8s.pod"), r#"@."k8s.pod""#);
        assert_eq!(column_ref(r#"a"b\c"#), r#"@."a\"b\\c""#);
        assert_eq!(column_ref(""), r#"@."""#);
    }

    #[test]
    fn odd_column_names_stay_inside_the_grammar() {
        let cols = classified(&[
            ("Log Message", "string"),
            ("event time", "timestamp"),
            ("log level", "string"),
        ]);
        assert_eq!(
            search_pipeline(&cols, "foo", 10),
            "filter contains(string(@.\"Log Message\"), \"foo\") or contains(string(@.\"log level\"), \"foo\")\nlimit 10"
        );
        assert_eq!(
            recent_pipeline(&cols, 10),
            "sort desc(@.\"event time\")\nlimit 10"
        );

        let sev = classified(&[("Level", "string")]);
        let p = error_counts_pipeline("d1", &sev, "service name", &["error".into()]).unwrap();
        assert_eq!(
            p,
            "filter Level in (\"error\")\nstatsby count:count(1), group_by(@.\"service name\")"
        );
    }

    #[test]
    fn search_over_single_column() {
        let cols = classified(&[("message", "string"), ("timestamp", "timestamp")]);
        assert_eq!(
            search_pipeline(&cols, "foo", 100),
            "filter contains(string(message), \"foo\")\nlimit 100"
        );
    }

    #[test]
    fn search_ors_all_string_columns() {
        let cols = classified(&[("message", "string"), ("n", "int64"), ("log", "string")]);
        let p = search_pipeline(&cols, "a\"b", 7);
        assert_eq!(
            p,
            "filter contains(string(message), \"a\\\"b\") or contains(string(log), \"a\\\"b\")\nlimit 7"
        );
    }

    #[test]
    fn search_without_schema_uses_all_fields() {
        let cols = classify_columns(&[]);
        let q = synthesize(
            "41000001",
            &cols,
            &Intent::Search {
                keyword: "boom".into(),
                limit: 100,
            },
        )
        .unwrap();
        assert_eq!(
            q.stages[0].pipeline,
            "filter contains(string(FIELDS), \"boom\")\nlimit 100"
        );
        assert!(q.validate().is_ok());
    }

    #[test]
    fn error_counts_require_severity_column() {
        let cols = classified(&[("foo", "string")]);
        let err = error_counts_pipeline("d1", &cols, "service", &["error".into()]).unwrap_err();
        assert!(matches!(err, ObserveError::NoSeverityColumn { .. }));
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn error_counts_filter_and_group() {
        let cols = classified(&[("body", "string"), ("level", "string")]);
        let levels: Vec<String> = ["error", "fatal"].iter().map(|s| s.to_string()).collect();
        let p = error_counts_pipeline("d1", &cols, " service ", &levels).unwrap();
        assert_eq!(
            p,
            "filter level in (\"error\", \"fatal\")\nstatsby count:count(1), group_by(service)"
        );
        assert!(error_counts_pipeline("d1", &cols, "", &levels).is_err());
        assert!(error_counts_pipeline("d1", &cols, "svc", &[]).is_err());
    }

    #[test]
    fn recent_sorts_by_detected_timestamp() {
        let cols = classified(&[("ts", "timestamp")]);
        assert_eq!(recent_pipeline(&cols, 25), "sort desc(ts)\nlimit 25");
        let none = classified(&[("a", "string")]);
        assert_eq!(recent_pipeline(&none, 5), "sort desc(timestamp)\nlimit 5");
    }
}
