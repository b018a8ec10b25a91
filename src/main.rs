use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use quakeingest_service::config::ServiceConfig;
use quakeingest_service::http::ReqwestTransport;
use quakeingest_service::import::{
    EventFilters, ImportOptions, ImportResult, Importer, ImporterSettings, TimeWindow,
};
use quakeingest_service::ingest::text::parse_time;
use quakeingest_service::ingest::{FdsnClient, fdsn_breaker};
use quakeingest_service::logging::{DataSource, init_logging};
use quakeingest_service::regions::{all_region_slugs, find_region};
use quakeingest_service::resilience::{ResilientClient, RetryOptions, TracingObserver};
use quakeingest_service::store::{CatalogueStore, MemoryStore, PgStore};

/// Import earthquakes from the GeoNet FDSN event service into a catalogue.
#[derive(Parser, Debug)]
#[command(name = "quake-import", version, about)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Import the last N hours (default from config, normally 24)
    #[arg(long, conflicts_with_all = ["start", "end"])]
    hours: Option<u32>,

    /// Window start, e.g. 2024-10-24T00:00:00Z
    #[arg(long, requires = "end", value_parser = parse_cli_time)]
    start: Option<DateTime<Utc>>,

    /// Window end
    #[arg(long, requires = "start", value_parser = parse_cli_time)]
    end: Option<DateTime<Utc>>,

    /// Named region preset (north-island, south-island, nz-deep, new-zealand)
    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    min_magnitude: Option<f64>,

    #[arg(long)]
    max_magnitude: Option<f64>,

    /// Minimum depth in km
    #[arg(long)]
    min_depth: Option<f64>,

    /// Maximum depth in km
    #[arg(long)]
    max_depth: Option<f64>,

    /// Existing catalogue to import into
    #[arg(long)]
    catalogue_id: Option<String>,

    /// Name for a newly created catalogue
    #[arg(long)]
    catalogue_name: Option<String>,

    /// Overwrite events already in the catalogue
    #[arg(long)]
    update_existing: bool,

    /// Use an in-memory store instead of PostgreSQL (nothing is kept)
    #[arg(long)]
    memory: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn parse_cli_time(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_time(raw).ok_or_else(|| format!("unrecognised time '{raw}'"))
}

impl Args {
    fn import_options(&self, config: &ServiceConfig) -> Result<ImportOptions, Box<dyn Error>> {
        let window = match (self.start, self.end) {
            (Some(start), Some(end)) if start < end => TimeWindow::Between { start, end },
            (Some(_), Some(_)) => return Err("--start must be before --end".into()),
            _ => TimeWindow::LastHours(self.hours.unwrap_or(config.import.default_lookback_hours)),
        };

        let options = ImportOptions {
            window,
            filters: EventFilters {
                min_magnitude: self.min_magnitude,
                max_magnitude: self.max_magnitude,
                min_depth_km: self.min_depth,
                max_depth_km: self.max_depth,
                bounds: None,
            },
            update_existing: self.update_existing,
            catalogue_id: self.catalogue_id.clone(),
            catalogue_name: self.catalogue_name.clone(),
        };

        match &self.region {
            Some(slug) => {
                let region = find_region(slug).ok_or_else(|| {
                    format!("unknown region '{}' (known: {})", slug, all_region_slugs().join(", "))
                })?;
                Ok(options.with_region(region))
            }
            None => Ok(options),
        }
    }
}

async fn open_store(args: &Args, config: &ServiceConfig) -> Result<Arc<dyn CatalogueStore>, Box<dyn Error>> {
    if args.memory {
        tracing::info!(source = %DataSource::System, "Using in-memory store; results are not kept");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let url = config
        .database
        .url
        .as_deref()
        .ok_or("DATABASE_URL is not set (use --memory for a dry run)")?;
    let store = PgStore::connect(url).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn build_client(config: &ServiceConfig) -> Result<FdsnClient, Box<dyn Error>> {
    let transport = Arc::new(ReqwestTransport::new(
        &config.fdsn.user_agent,
        config.fdsn.connect_timeout(),
    )?);
    let observer = Arc::new(TracingObserver);
    let http = ResilientClient::new(transport).with_observer(observer.clone());
    let breaker = fdsn_breaker(config.breaker.clone()).with_observer(observer);

    Ok(FdsnClient::new(
        config.fdsn.base_url.clone(),
        http,
        Arc::new(breaker),
        RetryOptions::from(&config.retry),
    ))
}

async fn run(args: Args, config: ServiceConfig) -> Result<ImportResult, Box<dyn Error>> {
    let options = args.import_options(&config)?;
    let store = open_store(&args, &config).await?;
    let client = build_client(&config)?;
    let importer = Importer::new(client, store, ImporterSettings::from(&config.import));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(source = %DataSource::System, "Interrupted; finishing in-flight work");
            on_interrupt.cancel();
        }
    });

    Ok(importer.import_events_with_cancel(&options, &cancel).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match ServiceConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("quake-import: {e}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = init_logging(&config.logging.level, args.json_logs || config.logging.json) {
        eprintln!("quake-import: {e}");
        return ExitCode::from(2);
    }

    match run(args, config).await {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!(source = %DataSource::System, error = %e, "Could not encode result"),
            }
            if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!(source = %DataSource::System, error = %e, "Import could not start");
            ExitCode::from(2)
        }
    }
}
