use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use common::cli::{
    CommonArgs,
    utils::{display_config, init_logging, load_config},
};
use common::config::Configuration;
use datasource::{
    DataQuery, DatasourceSettings, IntervalResolver, QueryExecutor, ResolverDefaults, TimeRange,
    data_query,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Run Prometheus-compatible queries and print the decoded frames
#[derive(Parser)]
#[command(name = "promsource", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one query and print its frames as JSON
    Query(QueryArgs),
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Args)]
struct QueryArgs {
    /// Query expression, placeholders such as $__interval are expanded
    #[arg(long)]
    expr: String,

    /// Start of the time range (RFC 3339), defaults to one hour before `--to`
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// End of the time range (RFC 3339), defaults to now
    #[arg(long)]
    to: Option<DateTime<Utc>>,

    /// Evaluate at `--to` only
    #[arg(long)]
    instant: bool,

    /// Legend template, e.g. "{{job}}" or "__auto"
    #[arg(long, default_value = "")]
    legend: String,

    /// Minimum interval of the query, e.g. "30s"
    #[arg(long, default_value = "")]
    interval: String,

    #[arg(long, default_value_t = 0)]
    max_data_points: i64,

    #[arg(long, default_value = "A")]
    ref_id: String,

    /// Ask the upstream for a query trace
    #[arg(long)]
    trace: bool,
}

impl QueryArgs {
    fn time_range(&self) -> TimeRange {
        let to = self.to.unwrap_or_else(Utc::now);
        let from = self.from.unwrap_or(to - chrono::Duration::hours(1));
        TimeRange::new(from, to)
    }

    fn data_query(&self) -> Result<DataQuery> {
        let json = json!({
            "refId": self.ref_id,
            "expr": self.expr,
            "instant": self.instant,
            "range": !self.instant,
            "interval": self.interval,
            "legendFormat": self.legend,
            "trace": self.trace,
        });
        data_query(&self.ref_id, &json, self.time_range(), self.max_data_points)
            .map_err(|err| anyhow::anyhow!("Invalid query {}: {err}", self.ref_id))
    }
}

fn executor(config: &Configuration) -> Result<QueryExecutor> {
    let settings = DatasourceSettings::new(
        &config.datasource.url,
        &config.datasource.http_method,
        &config.datasource.custom_query_parameters,
        &config.datasource.time_interval,
    )
    .context("Invalid datasource settings")?;

    let resolver = IntervalResolver::new(ResolverDefaults {
        default_scrape_interval: config.resolver.default_scrape_interval,
        instant_default_step: config.resolver.instant_default_step,
        default_resolution: config.resolver.default_resolution,
        rate_scrape_fallback: config.resolver.rate_scrape_fallback,
    });

    let client = reqwest::Client::builder()
        .timeout(config.http.timeout)
        .build()
        .context("Failed to build HTTP client")?;

    Ok(QueryExecutor::new(client, settings, resolver))
}

async fn run_query(config: &Configuration, args: QueryArgs) -> Result<()> {
    let executor = executor(config)?;
    let query = args.data_query()?;
    log::info!(
        "Querying {} with {}",
        executor.settings().url,
        executor.settings().http_method
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, canceling queries");
            interrupt.cancel();
        }
    });

    let responses = executor
        .execute(vec![query], false, &cancel)
        .await;

    let mut failed = 0;
    let mut output = serde_json::Map::new();
    for (ref_id, result) in responses {
        let entry = match result {
            Ok(frames) => json!({ "frames": frames }),
            Err(err) => {
                failed += 1;
                json!({ "error": err.to_string(), "status": err.status.as_u16() })
            }
        };
        output.insert(ref_id, entry);
    }

    let rendered = serde_json::to_string_pretty(&output).context("Failed to serialize frames")?;
    println!("{rendered}");

    if failed > 0 {
        anyhow::bail!("{failed} query(ies) failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let config = load_config(cli.common.config.as_ref())?;

    match cli.command {
        Commands::Config => display_config(&config),
        Commands::Query(args) => run_query(&config, args).await,
    }
}
