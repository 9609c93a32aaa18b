use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "promsource.toml";

/// Prefix of environment variable overrides, e.g. `PROMSOURCE__DATASOURCE__URL`
pub const ENV_PREFIX: &str = "PROMSOURCE__";

/// Upstream datasource settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasourceConfig {
    /// Base URL of the Prometheus-compatible API (e.g. "http://localhost:8428")
    pub url: String,
    /// HTTP method used for queries ("POST" or "GET")
    pub http_method: String,
    /// Extra URL-encoded query parameters merged into every request
    pub custom_query_parameters: String,
    /// Datasource-level minimum interval (e.g. "30s"), empty when not configured
    pub time_interval: String,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:8428"),
            http_method: String::from("POST"),
            custom_query_parameters: String::new(),
            time_interval: String::new(),
        }
    }
}

/// Defaults used when a query resolves its step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Minimum interval of range queries when no hint resolves
    #[serde(with = "humantime_serde")]
    pub default_scrape_interval: Duration,
    /// Step of instant queries when no hint resolves
    #[serde(with = "humantime_serde")]
    pub instant_default_step: Duration,
    /// Number of points a range query aims for when `maxDataPoints` is unset
    pub default_resolution: u64,
    /// Scrape interval assumed by `$__rate_interval` when none resolves
    #[serde(with = "humantime_serde")]
    pub rate_scrape_fallback: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_scrape_interval: Duration::from_secs(15),
            instant_default_step: Duration::from_secs(5 * 60),
            default_resolution: 1500,
            rate_scrape_fallback: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout of a single upstream round trip
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub datasource: DatasourceConfig,
    pub resolver: ResolverConfig,
    pub http: HttpConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}
