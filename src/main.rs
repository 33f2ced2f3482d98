//! # Formulary Search Server Main Driver
//!
//! ## Purpose
//! Main entry point for the formulary search server. Wires the release cache,
//! dataset cache, vocabulary client, and search engine together and serves
//! the HTTP API.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration file, command line arguments, environment variables
//! - **Output**: Running web server exposing the formulary search endpoint
//! - **Initialization**: Optional dataset preload, health checks, logging setup
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Wire cache store, release resolver, dataset cache, and RxNorm client
//! 4. Optionally preload the formulary dataset
//! 5. Start the web API server
//! 6. Handle shutdown signals gracefully

use clap::{Arg, Command};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use formulary_search::{
    api::ApiServer,
    cache::CacheStore,
    config::Config,
    dataset::{CmsDatasetLoader, DatasetCache, DatasetProvider},
    errors::Result,
    release::ReleaseResolver,
    search::SearchEngine,
    vocab::RxNormClient,
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("formulary-server")
        .version("0.1.0")
        .author("Medicare Data Team")
        .about("Medicare Part D formulary search engine over cached CMS monthly releases")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("refresh-dataset")
                .long("refresh-dataset")
                .help("Load the formulary dataset before serving requests")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-health")
                .long("check-health")
                .help("Run health checks and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Load configuration
    let config_path = matches.get_one::<String>("config").unwrap();
    let mut config = Config::from_file(config_path)?;

    // Override port if specified
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    let config = Arc::new(config);

    // Initialize logging
    init_logging(&config)?;

    info!("Starting Formulary Search Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", config_path);

    // Run health checks if requested
    if matches.get_flag("check-health") {
        return run_health_checks(&config);
    }

    // Initialize application components
    let app_state = initialize_components(config.clone())?;

    // Preload the dataset if requested; a failure here is not fatal since
    // the first search retries the load anyway
    if matches.get_flag("refresh-dataset") {
        info!("Preloading formulary dataset...");
        match app_state.datasets.current().await {
            Ok(dataset) => info!(
                "Preloaded release {} ({} coverage rows)",
                dataset.month,
                dataset.coverage.len()
            ),
            Err(e) => warn!("Dataset preload failed: {}", e),
        }
    }

    // Start the API server
    let server = ApiServer::new(app_state.clone()).await?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    info!(
        "Formulary Search Engine started on {}:{}",
        config.server.host, config.server.port
    );

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = server_handle => {
            warn!("Server stopped unexpectedly");
        }
    }

    info!("Formulary Search Engine shut down");
    Ok(())
}

/// Initialize logging and tracing
fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .json()
                    .with_filter(filter),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_filter(filter),
            )
            .init();
    }

    Ok(())
}

/// Initialize all application components
fn initialize_components(config: Arc<Config>) -> Result<AppState> {
    info!("Initializing application components...");

    let store = CacheStore::new(&config.cache.root_dir, config.cache.retention_days)?;
    let resolver = ReleaseResolver::new(&config.catalog, store)?;
    let loader = Arc::new(CmsDatasetLoader::new(resolver));
    let datasets = Arc::new(DatasetCache::new(loader, config.search.dataset_ttl_seconds));

    let drugs = Arc::new(RxNormClient::new(&config.rxnorm)?);

    let search_engine = Arc::new(SearchEngine::new(
        datasets.clone(),
        drugs,
        config.search.clone(),
        config.catalog.dataset_title.clone(),
    ));

    info!("All components initialized");
    Ok(AppState {
        config,
        search_engine,
        datasets,
    })
}

/// Run startup health checks
fn run_health_checks(config: &Config) -> Result<()> {
    info!("Running health checks...");

    // The cache root must be creatable and writable
    let store = CacheStore::new(&config.cache.root_dir, config.cache.retention_days)?;
    let manifest = store.load_manifest();
    info!(
        "Cache root {:?} is usable ({} cached releases)",
        config.cache.root_dir,
        manifest.len()
    );

    info!("All health checks passed");
    Ok(())
}
