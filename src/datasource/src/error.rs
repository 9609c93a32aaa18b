//! Error types for query translation, transport and response decoding

use std::num::ParseFloatError;

use grafana_plugin_sdk::backend;
use reqwest::StatusCode;

use crate::interval::IntervalError;
use crate::transport;

/// Malformed input detected before any request is attempted
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("url can't be blank")]
    BlankUrl,
    #[error("failed to parse datasource url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("expression can't be blank")]
    BlankExpression,
    #[error(transparent)]
    Interval(#[from] IntervalError),
}

/// The upstream answered, but its body does not describe usable series
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("upstream returned an error ({error_type}): {message}")]
    Upstream { error_type: String, message: String },
    #[error("unknown result type {0:?}")]
    UnknownResultType(String),
    #[error("unmarshal err {source} for {result_type} result")]
    Unmarshal {
        result_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("metric {metric} contains no values")]
    NoValues { metric: String },
    #[error("metric {metric}, unable to parse float64 from {value:?}: {source}")]
    InvalidValue {
        metric: String,
        value: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("error negative timestamp: {0}")]
    NegativeTimestamp(f64),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(f64),
    #[error("invalid frame metadata: {0}")]
    Metadata(#[source] serde_json::Error),
}

/// Everything that can land in a query's result slot
#[derive(Debug, thiserror::Error)]
pub enum DatasourceError {
    #[error("failed to parse query json: {0}")]
    QueryJson(#[source] serde_json::Error),
    #[error("failed to create request URL: {0}")]
    Build(#[from] BuildError),
    #[error("failed to make http request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("got unexpected response status code: {} with request url: {url:?}", .status.as_u16())]
    UnexpectedStatus { status: StatusCode, url: String },
    #[error("failed to read response body: {0}")]
    ReadBody(#[source] reqwest::Error),
    #[error("failed to decode body response: {0}")]
    Body(#[source] serde_json::Error),
    #[error("failed to prepare data from response: {0}")]
    Decode(#[from] DecodeError),
    #[error("frame validation failed: {0}")]
    Frame(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to parse FromAlert header value: {0:?}")]
    AlertingHeader(String),
    #[error("query canceled")]
    Canceled,
    #[error("query task failed: {0}")]
    Task(String),
}

impl From<IntervalError> for DatasourceError {
    fn from(err: IntervalError) -> Self {
        Self::Build(BuildError::Interval(err))
    }
}

impl DatasourceError {
    /// Connection-level failures that are worth exactly one more attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) | Self::ReadBody(err) => transport::is_trivial_error(err),
            _ => false,
        }
    }

    /// HTTP-like status reported alongside the error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnexpectedStatus { status, .. } => *status,
            Self::Body(_) | Self::Decode(_) | Self::Frame(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Error attached to the result slot of a single query
#[derive(Debug, thiserror::Error)]
#[error("Error querying datasource for query {ref_id}: {source}")]
pub struct QueryError {
    pub ref_id: String,
    pub status: StatusCode,
    #[source]
    pub source: DatasourceError,
}

impl QueryError {
    pub fn new(ref_id: impl Into<String>, source: DatasourceError) -> Self {
        Self {
            ref_id: ref_id.into(),
            status: source.status(),
            source,
        }
    }
}

impl backend::DataQueryError for QueryError {
    fn ref_id(self) -> String {
        self.ref_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = DatasourceError::UnexpectedStatus {
            status: StatusCode::BAD_GATEWAY,
            url: "http://localhost/api/v1/query".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            err.to_string(),
            "got unexpected response status code: 502 with request url: \"http://localhost/api/v1/query\""
        );

        let err = DatasourceError::Decode(DecodeError::UnknownResultType("foo".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.to_string(),
            "failed to prepare data from response: unknown result type \"foo\""
        );

        let err = DatasourceError::from(BuildError::BlankExpression);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_query_error_carries_stage() {
        let err = QueryError::new("A", DatasourceError::Build(BuildError::BlankUrl));
        assert_eq!(err.ref_id, "A");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "Error querying datasource for query A: failed to create request URL: url can't be blank"
        );
        assert_eq!(backend::DataQueryError::ref_id(err), "A");
    }
}
