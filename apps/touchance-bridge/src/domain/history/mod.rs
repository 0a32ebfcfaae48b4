//! History Types
//!
//! A history query is a window `(symbol, data type, start, end)` that the
//! gateway serves page by page. Each page row carries a `QryIndex` cursor
//! that continues the query.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default number of empty pages tolerated before the first data arrives.
pub const DEFAULT_RETRY_BUDGET: u32 = 30;

/// Default wait between empty pages.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// A bounded history query.
///
/// Field names on the wire follow the gateway's `Param` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryWindow {
    /// Instrument symbol, e.g. `TC.F.TWF.FITX.HOT`.
    #[serde(rename = "Symbol")]
    pub symbol: String,
    /// History data type code (`TICKS`, `1K`, `DK`).
    #[serde(rename = "SubDataType")]
    pub data_type: String,
    /// Window start, gateway time format (`YYYYMMDDHH`).
    #[serde(rename = "StartTime")]
    pub start_time: String,
    /// Window end, gateway time format.
    #[serde(rename = "EndTime")]
    pub end_time: String,
}

impl HistoryWindow {
    /// Create a window.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        data_type: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            data_type: data_type.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }
}

/// One history row as delivered to consumers.
///
/// `his_data` is the gateway row with the window's `Symbol` merged in; row
/// fields take precedence on conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// History data type code of the window.
    #[serde(rename = "DataType")]
    pub data_type: String,
    /// Window start.
    #[serde(rename = "StartTime")]
    pub start_time: String,
    /// Window end.
    #[serde(rename = "EndTime")]
    pub end_time: String,
    /// Row payload.
    #[serde(rename = "HisData")]
    pub his_data: Map<String, Value>,
}

impl HistoryRecord {
    /// Build a record from one page row.
    #[must_use]
    pub fn from_row(window: &HistoryWindow, row: Map<String, Value>) -> Self {
        let mut his_data = Map::with_capacity(row.len() + 1);
        his_data.insert("Symbol".to_string(), Value::String(window.symbol.clone()));
        his_data.extend(row);

        Self {
            data_type: window.data_type.clone(),
            start_time: window.start_time.clone(),
            end_time: window.end_time.clone(),
            his_data,
        }
    }

    /// Pagination cursor of this row.
    #[must_use]
    pub fn qry_index(&self) -> Option<&Value> {
        self.his_data.get("QryIndex").filter(|v| !v.is_null())
    }
}

/// Extract the rows of a GETHISDATA reply.
///
/// A missing or `null` `HisData` is an empty page. Non-object rows are
/// skipped.
#[must_use]
pub fn page_rows(reply: &Value) -> Vec<Map<String, Value>> {
    match reply.get("HisData") {
        Some(Value::Array(rows)) => rows
            .iter()
            .filter_map(|row| row.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// Retry policy for the first page of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPolicy {
    /// Empty pages tolerated while waiting for the first data.
    pub retry_budget: u32,
    /// Wait between empty pages.
    pub backoff: Duration,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn window() -> HistoryWindow {
        HistoryWindow::new("TC.F.TWF.FITX.HOT", "1K", "2024010100", "2024010200")
    }

    #[test]
    fn window_deserializes_from_param() {
        let param = json!({
            "Symbol": "TC.F.TWF.FITX.HOT",
            "SubDataType": "1K",
            "StartTime": "2024010100",
            "EndTime": "2024010200"
        });
        let parsed: HistoryWindow = serde_json::from_value(param).unwrap();
        assert_eq!(parsed, window());
    }

    #[test]
    fn record_merges_symbol_into_row() {
        let row = json!({"Close": "17000", "QryIndex": "42"});
        let record = HistoryRecord::from_row(&window(), row.as_object().unwrap().clone());

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "DataType": "1K",
                "StartTime": "2024010100",
                "EndTime": "2024010200",
                "HisData": {"Symbol": "TC.F.TWF.FITX.HOT", "Close": "17000", "QryIndex": "42"}
            })
        );
        assert_eq!(record.qry_index(), Some(&json!("42")));
    }

    #[test]
    fn row_symbol_wins_over_window_symbol() {
        let row = json!({"Symbol": "OTHER"});
        let record = HistoryRecord::from_row(&window(), row.as_object().unwrap().clone());
        assert_eq!(record.his_data["Symbol"], json!("OTHER"));
    }

    #[test]
    fn null_or_missing_his_data_is_empty_page() {
        assert!(page_rows(&json!({"HisData": null})).is_empty());
        assert!(page_rows(&json!({"Reply": "GETHISDATA"})).is_empty());
        assert_eq!(page_rows(&json!({"HisData": [{"a": 1}, 3]})).len(), 1);
    }

    #[test]
    fn default_policy() {
        let policy = HistoryPolicy::default();
        assert_eq!(policy.retry_budget, 30);
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }
}
