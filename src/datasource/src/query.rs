//! Inbound query model.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use grafana_plugin_sdk::{backend, pluginv2};
use serde::{Deserialize, Deserializer};

use crate::error::DatasourceError;

/// Header set by the host on requests issued by alert evaluation
pub const FROM_ALERT_HEADER: &str = "FromAlert";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// `to - from`, zero when the range is inverted
    pub fn duration(&self) -> Duration {
        (self.to - self.from).to_std().unwrap_or_default()
    }
}

impl From<&backend::TimeRange> for TimeRange {
    fn from(range: &backend::TimeRange) -> Self {
        Self::new(range.from, range.to)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        let to = Utc::now();
        Self {
            from: to - chrono::Duration::hours(1),
            to,
        }
    }
}

/// One panel query, as sent by the dashboard
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Query {
    pub ref_id: String,
    pub instant: bool,
    pub range: bool,
    /// Per-query minimum interval, e.g. "10s"
    pub interval: String,
    pub interval_ms: i64,
    /// Minimum interval configured on the datasource, forwarded by the dashboard
    pub time_interval: String,
    pub expr: String,
    pub legend_format: String,
    /// Ask the upstream for a query trace
    #[serde(deserialize_with = "deserialize_flag")]
    pub trace: bool,
    #[serde(skip)]
    pub max_data_points: i64,
    #[serde(skip)]
    pub time_range: TimeRange,
}

/// A query as handed over by the host: opaque JSON plus host-owned fields
pub type DataQuery = backend::DataQuery<serde_json::Value>;

/// Decodes the query JSON and attaches the host-owned fields
pub fn parse_query(data_query: &DataQuery) -> Result<Query, DatasourceError> {
    let mut query = Query::deserialize(&data_query.query).map_err(DatasourceError::QueryJson)?;
    if query.ref_id.is_empty() {
        query.ref_id = data_query.ref_id.clone();
    }
    query.time_range = TimeRange::from(&data_query.time_range);
    query.max_data_points = data_query.max_data_points;
    Ok(query)
}

/// Builds a host query the way it arrives over the plugin protocol
pub fn data_query(
    ref_id: &str,
    json: &serde_json::Value,
    time_range: TimeRange,
    max_data_points: i64,
) -> Result<DataQuery, backend::ConvertFromError> {
    let raw = pluginv2::DataQuery {
        ref_id: ref_id.to_string(),
        max_data_points,
        time_range: Some(pluginv2::TimeRange {
            from_epoch_ms: time_range.from.timestamp_millis(),
            to_epoch_ms: time_range.to.timestamp_millis(),
        }),
        json: json.to_string().into_bytes(),
        ..Default::default()
    };
    DataQuery::try_from(raw)
}

/// Whether the batch was issued by alert evaluation
pub fn check_alerting_request(headers: &HashMap<String, String>) -> Result<bool, DatasourceError> {
    let Some(value) = headers.get(FROM_ALERT_HEADER) else {
        return Ok(false);
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" => Ok(false),
        "true" | "1" => Ok(true),
        _ => Err(DatasourceError::AlertingHeader(value.clone())),
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(i64),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(flag)) => flag,
        Some(Flag::Number(n)) => n != 0,
        Some(Flag::Text(text)) => matches!(text.trim(), "1" | "true"),
        None => false,
    })
}
