//! Response decoding into frames.

use chrono::{DateTime, Utc};
use grafana_plugin_sdk::data;
use grafana_plugin_sdk::prelude::*;
use prom_api::{InstantSample, QueryData, QueryResponse, RangeSeries, SamplePair};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{DatasourceError, DecodeError};
use crate::legend::{Labels, labels_to_string};

pub const TIME_FIELD: &str = "Time";
pub const VALUE_FIELD: &str = "Value";
pub const TRACE_FRAME: &str = "trace";

/// Frame type tag of alerting vector frames, which carry values only
pub const NUMERIC_MULTI: &str = "numeric-multi";

const PARTIAL_RESPONSE_NOTICE: &str = "The shown results are marked as PARTIAL. \
    The result might be incomplete due to unavailable storage nodes or hitting some limits.";

/// Upstream result type that produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Vector,
    Matrix,
    Scalar,
    Trace,
}

/// Decoded `data.result`, one variant per result type
#[derive(Debug, Clone, PartialEq)]
pub enum ResultData {
    Vector(Vec<InstantSample>),
    Matrix(Vec<RangeSeries>),
    Scalar(SamplePair),
}

impl ResultData {
    pub fn parse(data: QueryData) -> Result<Self, DecodeError> {
        let QueryData {
            result_type,
            result,
        } = data;

        let parsed = match result_type.as_str() {
            "vector" => serde_json::from_value(result).map(Self::Vector),
            "matrix" => serde_json::from_value(result).map(Self::Matrix),
            "scalar" => serde_json::from_value(result).map(Self::Scalar),
            other => return Err(DecodeError::UnknownResultType(other.to_string())),
        };

        parsed.map_err(|source| DecodeError::Unmarshal {
            result_type,
            source,
        })
    }

    pub fn result_type(&self) -> ResultType {
        match self {
            Self::Vector(_) => ResultType::Vector,
            Self::Matrix(_) => ResultType::Matrix,
            Self::Scalar(_) => ResultType::Scalar,
        }
    }

    /// Converts the result into frames without metadata.
    ///
    /// With `for_alerting`, vector frames drop the time column.
    pub fn into_frames(self, for_alerting: bool) -> Result<Vec<data::Frame>, DecodeError> {
        match self {
            Self::Vector(samples) => samples
                .into_iter()
                .map(|sample| vector_frame(sample, for_alerting))
                .collect(),
            Self::Matrix(series) => series.into_iter().map(matrix_frame).collect(),
            Self::Scalar(pair) => Ok(vec![scalar_frame(pair)?]),
        }
    }
}

/// Decodes a response body.
pub fn decode(body: &[u8], for_alerting: bool) -> Result<Vec<data::Frame>, DatasourceError> {
    let response: QueryResponse = serde_json::from_slice(body).map_err(DatasourceError::Body)?;
    Ok(decode_response(response, for_alerting)?)
}

/// Turns a parsed response into frames, a trace frame first when the upstream sent one
pub fn decode_response(
    response: QueryResponse,
    for_alerting: bool,
) -> Result<Vec<data::Frame>, DecodeError> {
    if response.is_error() {
        if let Some(message) = response.error.as_deref().filter(|m| !m.is_empty()) {
            return Err(DecodeError::Upstream {
                error_type: response.error_type.clone().unwrap_or_default(),
                message: message.to_string(),
            });
        }
    }

    let QueryResponse {
        data,
        is_partial,
        trace,
        ..
    } = response;
    let partial = is_partial.unwrap_or_default();

    let result = ResultData::parse(data.unwrap_or_default())?;
    let result_type = result.result_type();
    let frame_type = (for_alerting && result_type == ResultType::Vector).then_some(NUMERIC_MULTI);

    let mut frames = Vec::new();
    if let Some(trace) = trace.filter(|trace| !trace.is_null()) {
        let mut frame = data::Frame::new(TRACE_FRAME);
        frame.meta = Some(frame_meta(ResultType::Trace, Some(trace), None, partial)?);
        frames.push(frame);
    }

    for mut frame in result.into_frames(for_alerting)? {
        frame.meta = Some(frame_meta(result_type, None, frame_type, partial)?);
        frames.push(frame);
    }

    Ok(frames)
}

/// Metadata in the dataframe JSON layout: `type`, `custom` and `notices`
fn frame_meta(
    result_type: ResultType,
    trace: Option<Value>,
    frame_type: Option<&str>,
    partial: bool,
) -> Result<data::Metadata, DecodeError> {
    let mut custom = json!({ "resultType": result_type });
    if let Some(trace) = trace {
        custom["trace"] = trace;
    }

    let mut meta = json!({ "custom": custom });
    if let Some(frame_type) = frame_type {
        meta["type"] = json!(frame_type);
    }
    if partial {
        meta["notices"] = json!([{ "severity": "warning", "text": PARTIAL_RESPONSE_NOTICE }]);
    }

    serde_json::from_value(meta).map_err(DecodeError::Metadata)
}

fn series_frame(times: Option<Vec<DateTime<Utc>>>, labels: Labels, values: Vec<f64>) -> data::Frame {
    let mut value = values.into_field(VALUE_FIELD);
    value.labels = labels.into_iter().collect();

    let fields = match times {
        Some(times) => vec![times.into_field(TIME_FIELD), value],
        None => vec![value],
    };
    data::Frame::new("").with_fields(fields)
}

fn vector_frame(sample: InstantSample, for_alerting: bool) -> Result<data::Frame, DecodeError> {
    let labels: Labels = sample.metric.into_iter().collect();
    let (timestamp, raw) = sample.value;

    let time = parse_timestamp(timestamp)?;
    let value = parse_value(&labels, &raw)?;

    let times = (!for_alerting).then(|| vec![time]);
    Ok(series_frame(times, labels, vec![value]))
}

fn matrix_frame(series: RangeSeries) -> Result<data::Frame, DecodeError> {
    let labels: Labels = series.metric.into_iter().collect();
    if series.values.is_empty() {
        return Err(DecodeError::NoValues {
            metric: labels_to_string(&labels),
        });
    }

    let mut times = Vec::with_capacity(series.values.len());
    let mut values = Vec::with_capacity(series.values.len());
    for (timestamp, raw) in series.values {
        times.push(parse_timestamp(timestamp)?);
        values.push(parse_value(&labels, &raw)?);
    }

    Ok(series_frame(Some(times), labels, values))
}

fn scalar_frame((timestamp, raw): SamplePair) -> Result<data::Frame, DecodeError> {
    let labels = Labels::new();
    let time = parse_timestamp(timestamp)?;
    let value = parse_value(&labels, &raw)?;

    Ok(series_frame(Some(vec![time]), labels, vec![value]))
}

fn parse_value(labels: &Labels, raw: &str) -> Result<f64, DecodeError> {
    raw.parse::<f64>().map_err(|source| DecodeError::InvalidValue {
        metric: labels_to_string(labels),
        value: raw.to_string(),
        source,
    })
}

/// Converts floating seconds since epoch to a timestamp with millisecond precision.
///
/// The fraction is taken from the value printed with three decimals, so
/// `0.9995` carries over into the next second instead of losing it.
pub fn parse_timestamp(timestamp: f64) -> Result<DateTime<Utc>, DecodeError> {
    if !timestamp.is_finite() {
        return Err(DecodeError::InvalidTimestamp(timestamp));
    }
    if timestamp < 0.0 {
        return Err(DecodeError::NegativeTimestamp(timestamp));
    }

    let formatted = format!("{timestamp:.3}");
    let (secs, millis) = formatted
        .split_once('.')
        .ok_or(DecodeError::InvalidTimestamp(timestamp))?;
    let secs: i64 = secs
        .parse()
        .map_err(|_| DecodeError::InvalidTimestamp(timestamp))?;
    let millis: u32 = millis
        .parse()
        .map_err(|_| DecodeError::InvalidTimestamp(timestamp))?;

    DateTime::from_timestamp(secs, millis * 1_000_000).ok_or(DecodeError::InvalidTimestamp(timestamp))
}
