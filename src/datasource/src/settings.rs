use serde::Deserialize;

use crate::transport::HttpMethod;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("url can't be blank")]
    BlankUrl,
    #[error("failed to parse datasource url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to parse datasource settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse http method: {0}")]
    HttpMethod(String),
}

/// Per-instance settings consumed by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasourceSettings {
    /// Base URL of the Prometheus-compatible API
    pub url: String,
    pub http_method: HttpMethod,
    /// Extra parameters merged into every query URL
    pub query_params: Vec<(String, String)>,
    /// Datasource-level minimum interval, empty when not configured
    pub time_interval: String,
}

/// JSON settings blob as handed over by the host
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonData {
    #[serde(default)]
    http_method: String,
    #[serde(default)]
    custom_query_parameters: String,
    #[serde(default)]
    time_interval: String,
}

impl DatasourceSettings {
    pub fn new(
        url: &str,
        http_method: &str,
        custom_query_parameters: &str,
        time_interval: &str,
    ) -> Result<Self, SettingsError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SettingsError::BlankUrl);
        }
        url::Url::parse(url)?;

        let http_method = http_method
            .parse::<HttpMethod>()
            .map_err(SettingsError::HttpMethod)?;

        Ok(Self {
            url: url.to_string(),
            http_method,
            query_params: parse_query_params(custom_query_parameters),
            time_interval: time_interval.trim().to_string(),
        })
    }

    /// Settings from the host's JSON blob, e.g. `{"httpMethod": "GET", "customQueryParameters": "nocache=1"}`
    pub fn from_json(url: &str, json_data: &[u8]) -> Result<Self, SettingsError> {
        let data: JsonData = if json_data.iter().all(u8::is_ascii_whitespace) {
            JsonData::default()
        } else {
            serde_json::from_slice(json_data)?
        };

        Self::new(
            url,
            &data.http_method,
            &data.custom_query_parameters,
            &data.time_interval,
        )
    }
}

fn parse_query_params(raw: &str) -> Vec<(String, String)> {
    let raw = raw.trim().trim_start_matches('?');
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .filter(|(key, _)| !key.is_empty())
        .collect()
}
