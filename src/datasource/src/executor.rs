use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use grafana_plugin_sdk::{backend, data};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{DatasourceError, QueryError};
use crate::interval::IntervalResolver;
use crate::legend::apply_legend;
use crate::query::{DataQuery, check_alerting_request, parse_query};
use crate::request::build_query_url;
use crate::response::{TIME_FIELD, decode};
use crate::settings::DatasourceSettings;
use crate::template::{TemplateExpander, format_duration};
use crate::transport::HttpMethod;

/// Outcome of a single query slot
pub type QueryResult = Result<Vec<data::Frame>, QueryError>;

/// Runs batches of queries against one upstream.
///
/// Cloning is cheap: the HTTP client and settings are shared.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    client: reqwest::Client,
    settings: Arc<DatasourceSettings>,
    resolver: IntervalResolver,
}

impl QueryExecutor {
    pub fn new(
        client: reqwest::Client,
        settings: DatasourceSettings,
        resolver: IntervalResolver,
    ) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            resolver,
        }
    }

    pub fn settings(&self) -> &DatasourceSettings {
        &self.settings
    }

    /// Handles the headers and queries of a host request, answering in request order.
    ///
    /// Every frame is checked before it is handed back. An unparsable
    /// `FromAlert` header fails the whole batch.
    pub async fn query_data(
        &self,
        headers: &HashMap<String, String>,
        queries: Vec<DataQuery>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<backend::DataResponse, QueryError>>, DatasourceError> {
        let for_alerting = check_alerting_request(headers)?;
        tracing::debug!(
            "Received query_data request with {} queries, for alerting: {for_alerting}",
            queries.len()
        );

        let ref_ids: Vec<String> = queries.iter().map(|query| query.ref_id.clone()).collect();
        let mut results = self.execute(queries, for_alerting, cancel).await;

        Ok(ref_ids
            .into_iter()
            .filter_map(|ref_id| {
                let result = results.remove(&ref_id)?;
                Some(result.and_then(|frames| data_response(ref_id, frames)))
            })
            .collect())
    }

    /// Runs every query concurrently and collects the results by RefID.
    ///
    /// A failing query only affects its own slot. Canceling `cancel` makes
    /// every query still in flight fail with [`DatasourceError::Canceled`].
    pub async fn execute(
        &self,
        queries: Vec<DataQuery>,
        for_alerting: bool,
        cancel: &CancellationToken,
    ) -> HashMap<String, QueryResult> {
        let ref_ids: Vec<String> = queries.iter().map(|query| query.ref_id.clone()).collect();

        let handles: Vec<_> = queries
            .into_iter()
            .map(|query| {
                let executor = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { executor.run_query(query, for_alerting, &cancel).await })
            })
            .collect();

        let mut responses = HashMap::with_capacity(ref_ids.len());
        for (ref_id, joined) in ref_ids.into_iter().zip(join_all(handles).await) {
            let result = joined.unwrap_or_else(|err| {
                Err(QueryError::new(
                    ref_id.clone(),
                    DatasourceError::Task(err.to_string()),
                ))
            });

            if let Err(err) = &result {
                tracing::error!("Query failed for ref_id {ref_id}: {err}");
            }
            responses.insert(ref_id, result);
        }

        responses
    }

    async fn run_query(
        &self,
        query: DataQuery,
        for_alerting: bool,
        cancel: &CancellationToken,
    ) -> QueryResult {
        let ref_id = query.ref_id.clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DatasourceError::Canceled),
            outcome = self.run(query, for_alerting) => outcome,
        };

        outcome.map_err(|source| QueryError::new(ref_id, source))
    }

    async fn run(
        &self,
        data_query: DataQuery,
        for_alerting: bool,
    ) -> Result<Vec<data::Frame>, DatasourceError> {
        let query = parse_query(&data_query)?;

        let resolution = self
            .resolver
            .resolve(&query, &self.settings.time_interval)?;
        let expander = TemplateExpander::for_resolution(
            &resolution,
            query.time_range.duration(),
            &query.interval,
            self.resolver.defaults(),
        );
        let expr = expander.expand(&query.expr)?;

        let mut extra = self.settings.query_params.clone();
        if query.trace {
            extra.push(("trace".to_string(), "1".to_string()));
        }
        let url = build_query_url(
            &self.settings.url,
            &expr,
            resolution.step,
            &query.time_range,
            query.instant,
            &extra,
        )?;

        tracing::debug!(
            "Executing query {}: step {:?} ({:?}), url {url}",
            query.ref_id,
            resolution.step,
            resolution.source
        );

        let body = self.round_trip(&url).await?;
        let mut frames = decode(&body, for_alerting)?;

        let step_ms = resolution.step.as_secs_f64() * 1000.0;
        let executed = format!("Expr: {expr}\nStep: {}", format_duration(resolution.step));
        for frame in &mut frames {
            apply_legend(frame, &query.legend_format, &query.expr);
            if let Some(time) = frame
                .fields_mut()
                .iter_mut()
                .find(|field| field.name == TIME_FIELD)
            {
                time.config.get_or_insert_with(Default::default).interval = Some(step_ms);
            }
            frame
                .meta
                .get_or_insert_with(Default::default)
                .executed_query_string = Some(executed.clone());
        }

        Ok(frames)
    }

    /// One attempt with the configured method, and a single GET retry when
    /// the connection was dropped mid-flight.
    async fn round_trip(&self, url: &Url) -> Result<Bytes, DatasourceError> {
        match self.attempt(self.settings.http_method, url).await {
            Err(err) if err.is_transient() => {
                tracing::warn!("Connection to {url} dropped, retrying with GET: {err}");
                self.attempt(HttpMethod::Get, url).await
            }
            outcome => outcome,
        }
    }

    async fn attempt(&self, method: HttpMethod, url: &Url) -> Result<Bytes, DatasourceError> {
        let response = self
            .client
            .request(method.into(), url.clone())
            .send()
            .await
            .map_err(DatasourceError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasourceError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }

        response.bytes().await.map_err(DatasourceError::ReadBody)
    }
}

/// Checks every frame of a successful query and wraps them for the host
pub fn data_response(
    ref_id: String,
    frames: Vec<data::Frame>,
) -> Result<backend::DataResponse, QueryError> {
    match frames
        .iter()
        .map(|frame| frame.check())
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(checked) => Ok(backend::DataResponse::new(ref_id, checked)),
        Err(err) => {
            tracing::error!("Frame validation failed for ref_id {ref_id}: {err}");
            Err(QueryError::new(ref_id, DatasourceError::Frame(err.into())))
        }
    }
}
