use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Label name carrying the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Response envelope of `/api/v1/query` and `/api/v1/query_range`.
///
/// Example:
/// {
///   "status": "success",
///   "isPartial": false,
///   "data": {
///     "resultType": "vector",
///     "result": [
///       {"metric": {"__name__": "up", "job": "node"}, "value": [1670226793.123, "1"]}
///     ]
///   },
///   "trace": {"duration_msec": 0.42, "message": "/api/v1/query: ..."}
/// }
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct QueryResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: Option<QueryData>,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "isPartial", default, skip_serializing_if = "Option::is_none")]
    pub is_partial: Option<bool>,
    /// Query trace, present when the request carried `trace=1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<serde_json::Value>,
}

impl QueryResponse {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct QueryData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    /// Shape depends on `result_type`, see [`InstantSample`], [`RangeSeries`] and [`SamplePair`]
    #[serde(default)]
    pub result: serde_json::Value,
}

/// A `[timestamp, "value"]` pair: floating seconds since epoch and a decimal string
pub type SamplePair = (f64, String);

/// One entry of a `vector` result
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    pub value: SamplePair,
}

/// One entry of a `matrix` result
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<SamplePair>,
}
