//! Request URL construction for instant and range queries.

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use crate::error::BuildError;
use crate::query::TimeRange;
use crate::template::format_duration;

pub const INSTANT_QUERY_PATH: &str = "/api/v1/query";
pub const RANGE_QUERY_PATH: &str = "/api/v1/query_range";

/// Builds the upstream URL of a query.
///
/// Parameters already present on `base` come first, then `extra` is appended,
/// then the computed `query`, `time`/`start`/`end` and `step` replace any
/// value under the same key. Keys are encoded in sorted order.
pub fn build_query_url(
    base: &str,
    expr: &str,
    step: Duration,
    time_range: &TimeRange,
    instant: bool,
    extra: &[(String, String)],
) -> Result<Url, BuildError> {
    if base.trim().is_empty() {
        return Err(BuildError::BlankUrl);
    }
    if expr.trim().is_empty() {
        return Err(BuildError::BlankExpression);
    }

    let mut url = Url::parse(base.trim())?;

    let endpoint = if instant {
        INSTANT_QUERY_PATH
    } else {
        RANGE_QUERY_PATH
    };
    let path = format!("{}{endpoint}", url.path().trim_end_matches('/'));
    url.set_path(&path);

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    for (key, value) in extra {
        params.entry(key.clone()).or_default().push(value.clone());
    }

    let step = format_duration(step);
    let computed: Vec<(&str, String)> = if instant {
        vec![
            ("query", expr.to_string()),
            ("time", time_range.to.timestamp().to_string()),
            ("step", step),
        ]
    } else {
        vec![
            ("query", expr.to_string()),
            ("start", time_range.from.timestamp().to_string()),
            ("end", time_range.to.timestamp().to_string()),
            ("step", step),
        ]
    };
    for (key, value) in computed {
        params.insert(key.to_string(), vec![value]);
    }

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, values) in &params {
            for value in values {
                pairs.append_pair(key, value);
            }
        }
    }

    Ok(url)
}
