//! Query translation and response decoding for Prometheus-compatible query APIs.
//!
//! A panel query flows through [`IntervalResolver`] (step), [`TemplateExpander`]
//! (placeholders), [`request::build_query_url`] (wire request), the HTTP round
//! trip, [`response::decode`] (frames) and [`legend::apply_legend`] (names).
//! [`QueryExecutor`] drives whole batches concurrently.

pub mod error;
pub mod executor;
pub mod interval;
pub mod legend;
pub mod query;
pub mod request;
pub mod response;
pub mod settings;
pub mod template;
pub mod transport;

pub use error::{BuildError, DatasourceError, DecodeError, QueryError};
pub use executor::{QueryExecutor, QueryResult, data_response};
pub use interval::{IntervalResolver, ResolverDefaults};
pub use query::{DataQuery, Query, TimeRange, data_query, parse_query};
pub use settings::{DatasourceSettings, SettingsError};
pub use template::TemplateExpander;
pub use transport::HttpMethod;
