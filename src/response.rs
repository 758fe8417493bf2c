//! Decoding of query responses into named tables, and classification of
//! error-shaped bodies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueryError;

/// Inner error code the service uses when a result set exceeds its size
/// limit.
pub const RESULT_TOO_LARGE_CODE: &str = "-2133196797";

pub const PRIMARY_RESULT: &str = "PrimaryResult";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// One named result table: ordered columns and positionally aligned rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends `other`'s rows after this table's rows. Both tables must
    /// share the same column names.
    pub fn append(&mut self, other: ResultTable) -> Result<(), QueryError> {
        let same_schema = self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name);
        if !same_schema {
            return Err(QueryError::SchemaMismatch {
                left: self.column_names(),
                right: other.column_names(),
            });
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

/// All tables of one successful response, in the order the service sent
/// them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub tables: Vec<ResultTable>,
}

impl ResultSet {
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&ResultTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    #[cfg(test)]
    pub fn names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    #[cfg(test)]
    pub fn primary(&self) -> Result<&ResultTable, QueryError> {
        self.get(PRIMARY_RESULT).ok_or(QueryError::NoPrimaryResult)
    }

    pub fn into_primary(self) -> Result<ResultTable, QueryError> {
        self.tables
            .into_iter()
            .find(|t| t.name == PRIMARY_RESULT)
            .ok_or(QueryError::NoPrimaryResult)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub innererror: Option<InnerError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InnerError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorPayload {
    pub fn is_result_too_large(&self) -> bool {
        self.details.iter().any(|detail| {
            detail
                .innererror
                .as_ref()
                .is_some_and(|inner| inner.code == RESULT_TOO_LARGE_CODE)
        })
    }

    /// Most specific code and message available, preferring the first inner
    /// error over the outer one.
    pub fn describe(&self) -> (String, String) {
        let inner = self.details.iter().find_map(|d| d.innererror.as_ref());
        match inner {
            Some(inner) => (
                inner.code.clone(),
                if inner.message.is_empty() {
                    self.message.clone()
                } else {
                    inner.message.clone()
                },
            ),
            None => (self.code.clone(), self.message.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTable {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

/// Decoded reply body: either tables or an error object.
#[derive(Debug)]
pub enum RawResponse {
    Success(ResultSet),
    Failure(ErrorPayload),
}

impl RawResponse {
    /// Decodes a 200 body. A body carrying an `error` key is a failure even
    /// if it also carries tables.
    pub fn decode(body: &str) -> Result<Self, QueryError> {
        let mut value: Value = serde_json::from_str(body)?;
        let Some(object) = value.as_object_mut() else {
            return Err(QueryError::MalformedResponse(
                "expected a JSON object at the top level".to_string(),
            ));
        };

        if let Some(error) = object.remove("error") {
            let payload: ErrorPayload = serde_json::from_value(error).map_err(|err| {
                QueryError::MalformedResponse(format!("invalid error object: {err}"))
            })?;
            return Ok(RawResponse::Failure(payload));
        }

        let tables = object
            .remove("tables")
            .ok_or_else(|| QueryError::MalformedResponse("missing 'tables' list".to_string()))?;
        let tables: Vec<WireTable> = serde_json::from_value(tables)
            .map_err(|err| QueryError::MalformedResponse(format!("invalid 'tables': {err}")))?;

        let tables = tables
            .into_iter()
            .map(normalize_table)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawResponse::Success(ResultSet { tables }))
    }

    pub fn is_result_too_large(&self) -> bool {
        match self {
            RawResponse::Failure(payload) => payload.is_result_too_large(),
            RawResponse::Success(_) => false,
        }
    }
}

fn normalize_table(table: WireTable) -> Result<ResultTable, QueryError> {
    let width = table.columns.len();
    if let Some((index, row)) = table
        .rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != width)
    {
        return Err(QueryError::MalformedResponse(format!(
            "table '{}' row {index} has {} values for {width} columns",
            table.name,
            row.len()
        )));
    }
    Ok(ResultTable {
        name: table.name,
        columns: table.columns,
        rows: table.rows,
    })
}

/// Normalizes a success body into all of its named tables.
pub fn normalize(body: &str) -> Result<ResultSet, QueryError> {
    match RawResponse::decode(body)? {
        RawResponse::Success(set) => Ok(set),
        RawResponse::Failure(payload) => {
            let (code, message) = payload.describe();
            Err(QueryError::Service { code, message })
        }
    }
}

/// Reports whether `body` is an error payload whose details include the
/// size-limit code. Success payloads and unparseable bodies are simply not a
/// match.
pub fn is_result_too_large(body: &str) -> bool {
    RawResponse::decode(body).is_ok_and(|response| response.is_result_too_large())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_body() -> String {
        json!({
            "tables": [
                {
                    "name": "PrimaryResult",
                    "columns": [
                        {"name": "timestamp", "type": "datetime"},
                        {"name": "name", "type": "string"}
                    ],
                    "rows": [
                        ["2024-01-01T00:10:00Z", "a"],
                        ["2024-01-01T00:20:00Z", "b"]
                    ]
                },
                {
                    "name": "ExtendedProperties",
                    "columns": [{"name": "Key"}],
                    "rows": []
                }
            ]
        })
        .to_string()
    }

    fn error_body(code: &str) -> String {
        json!({
            "error": {
                "code": "PartialError",
                "message": "There were some errors when processing your query.",
                "details": [
                    {
                        "code": "EngineError",
                        "message": "Something went wrong processing your query on the server.",
                        "innererror": {
                            "code": code,
                            "message": "Query result set has exceeded the internal data size limit"
                        }
                    }
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn normalizes_all_named_tables() {
        let set = normalize(&success_body()).unwrap();
        assert_eq!(set.names(), vec!["PrimaryResult", "ExtendedProperties"]);
        let primary = set.primary().unwrap();
        assert_eq!(primary.column_names(), vec!["timestamp", "name"]);
        assert_eq!(primary.columns[0].kind.as_deref(), Some("datetime"));
        assert_eq!(primary.len(), 2);
    }

    #[test]
    fn missing_primary_result_is_its_own_error() {
        let body = json!({"tables": [{"name": "Other", "columns": [], "rows": []}]}).to_string();
        let set = normalize(&body).unwrap();
        assert!(set.get("Other").is_some());
        assert!(matches!(set.primary(), Err(QueryError::NoPrimaryResult)));
        assert!(matches!(set.into_primary(), Err(QueryError::NoPrimaryResult)));
    }

    #[test]
    fn missing_tables_is_malformed() {
        let err = normalize(r#"{"foo": 1}"#).unwrap_err();
        assert!(matches!(err, QueryError::MalformedResponse(_)));
    }

    #[test]
    fn column_without_name_is_malformed() {
        let body = json!({"tables": [{"name": "PrimaryResult", "columns": [{"type": "int"}], "rows": []}]})
            .to_string();
        assert!(matches!(
            normalize(&body),
            Err(QueryError::MalformedResponse(_))
        ));
    }

    #[test]
    fn ragged_rows_are_malformed() {
        let body = json!({
            "tables": [{"name": "PrimaryResult", "columns": [{"name": "a"}, {"name": "b"}], "rows": [[1, 2], [3]]}]
        })
        .to_string();
        let err = normalize(&body).unwrap_err();
        assert!(err.to_string().contains("row 1 has 1 values for 2 columns"));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            normalize("<html>oops</html>"),
            Err(QueryError::MalformedResponse(_))
        ));
    }

    #[test]
    fn classifier_matches_size_limit_code() {
        assert!(is_result_too_large(&error_body(RESULT_TOO_LARGE_CODE)));
    }

    #[test]
    fn classifier_ignores_other_codes() {
        assert!(!is_result_too_large(&error_body("-2133196800")));
    }

    #[test]
    fn classifier_ignores_success_payloads() {
        assert!(!is_result_too_large(&success_body()));
    }

    #[test]
    fn classifier_scans_every_detail() {
        let body = json!({
            "error": {
                "code": "PartialError",
                "message": "",
                "details": [
                    {"innererror": {"code": "Other"}},
                    {},
                    {"innererror": {"code": RESULT_TOO_LARGE_CODE}}
                ]
            }
        })
        .to_string();
        assert!(is_result_too_large(&body));
    }

    #[test]
    fn unrelated_error_body_normalizes_to_service_error() {
        let err = normalize(&error_body("-2133196800")).unwrap_err();
        match err {
            QueryError::Service { code, message } => {
                assert_eq!(code, "-2133196800");
                assert!(message.contains("size limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_without_details_falls_back_to_outer_code() {
        let payload: ErrorPayload =
            serde_json::from_value(json!({"code": "BadArgumentError", "message": "nope"})).unwrap();
        assert!(!payload.is_result_too_large());
        assert_eq!(
            payload.describe(),
            ("BadArgumentError".to_string(), "nope".to_string())
        );
    }

    #[test]
    fn append_requires_matching_columns() {
        let set = normalize(&success_body()).unwrap();
        let mut primary = set.primary().unwrap().clone();
        let other = set.get("ExtendedProperties").unwrap().clone();
        assert!(matches!(
            primary.append(other),
            Err(QueryError::SchemaMismatch { .. })
        ));

        let copy = primary.clone();
        primary.append(copy).unwrap();
        assert_eq!(primary.len(), 4);
        assert_eq!(primary.rows[2][1], json!("a"));
    }

    #[test]
    fn records_are_keyed_by_column_name() {
        let set = normalize(&success_body()).unwrap();
        let records = set.primary().unwrap().to_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["name"], json!("b"));
        assert_eq!(records[0]["timestamp"], json!("2024-01-01T00:10:00Z"));
    }
}
