//! # Medicare Part D Formulary Search Engine
//!
//! ## Overview
//! This library implements a formulary search engine over the monthly CMS
//! Part D drug-plan releases: free-text drug names are resolved to canonical
//! RXCUI identifiers, the latest release is cached locally, and coverage
//! rows are filtered, joined with plan metadata, and paginated.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `cache`: On-disk release cache with a JSON manifest and retention window
//! - `release`: Catalog discovery, archive download/extraction, cache fallback
//! - `parser`: Streaming pipe-delimited plan and coverage file parsing
//! - `vocab`: RxNorm drug-name resolution behind a trait seam
//! - `dataset`: In-memory dataset with the formulary-id join index and TTL cache
//! - `search`: Query validation, conjunctive filtering, pagination, enrichment
//! - `api`: REST API endpoints
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Search parameters (drug name, NDC, plan, tier, state, UM flags)
//! - **Output**: Paginated coverage entries enriched with plan name/state and
//!   tier labels, plus the full match count and data-source descriptor
//! - **Degradation**: Catalog outages fall back to the newest valid cached
//!   release; zero-match searches are normal empty results, never errors
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use formulary_search::cache::CacheStore;
//! use formulary_search::dataset::{CmsDatasetLoader, DatasetCache};
//! use formulary_search::release::ReleaseResolver;
//! use formulary_search::search::{SearchEngine, SearchParams};
//! use formulary_search::vocab::RxNormClient;
//! use formulary_search::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml")?;
//!     let store = CacheStore::new(&config.cache.root_dir, config.cache.retention_days)?;
//!     let resolver = ReleaseResolver::new(&config.catalog, store)?;
//!     let loader = Arc::new(CmsDatasetLoader::new(resolver));
//!     let datasets = Arc::new(DatasetCache::new(loader, config.search.dataset_ttl_seconds));
//!     let drugs = Arc::new(RxNormClient::new(&config.rxnorm)?);
//!     let engine = SearchEngine::new(
//!         datasets,
//!         drugs,
//!         config.search.clone(),
//!         config.catalog.dataset_title.clone(),
//!     );
//!
//!     let result = engine
//!         .search(SearchParams {
//!             drug_name: Some("metformin".to_string()),
//!             ..Default::default()
//!         })
//!         .await?;
//!     println!("Found {} entries", result.total);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod api;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod parser;
pub mod release;
pub mod search;
pub mod vocab;

// Re-exports for convenience
pub use config::Config;
pub use errors::{FormularyError, Result};
pub use search::{SearchEngine, SearchParams, SearchResult};

use std::sync::Arc;

/// Application state shared across components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Config>,
    pub search_engine: Arc<search::SearchEngine>,
    pub datasets: Arc<dataset::DatasetCache>,
}
