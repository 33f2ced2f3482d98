//! # Dataset Module
//!
//! ## Purpose
//! Owns the in-memory representation of one monthly release (plan records,
//! coverage rows, and the formulary-id join index) plus the bounded cache
//! that keeps the most recently parsed dataset alive between searches.
//!
//! ## Input/Output Specification
//! - **Input**: A locally extracted release (via the release resolver)
//! - **Output**: Shared `Arc<FormularyDataset>` handles for the search engine
//! - **Caching**: TTL-based (default 1 hour), replace-on-success-only
//!
//! ## Key Features
//! - Plan file fully indexed before the larger coverage file is collected
//! - Injected `DatasetProvider`/`DatasetLoader` seams for testability
//! - Concurrent readers see either the previous dataset or the fresh one,
//!   never a partially built instance

use crate::errors::{FormularyError, Result};
use crate::parser::{self, CoverageRecord, PlanRecord};
use crate::release::{LocalRelease, ReleaseResolver};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One parsed monthly release held in memory
#[derive(Debug)]
pub struct FormularyDataset {
    /// Release month key (YYYY-MM)
    pub month: String,
    /// Source file date as published by the catalog
    pub file_date: String,
    plans: Vec<PlanRecord>,
    plan_index: HashMap<String, usize>,
    /// Coverage rows in original file order
    pub coverage: Vec<CoverageRecord>,
}

impl FormularyDataset {
    /// Build a dataset, indexing plans by formulary id (first occurrence wins)
    pub fn new(
        month: String,
        file_date: String,
        plans: Vec<PlanRecord>,
        coverage: Vec<CoverageRecord>,
    ) -> Self {
        let mut plan_index = HashMap::with_capacity(plans.len());
        for (idx, plan) in plans.iter().enumerate() {
            plan_index.entry(plan.formulary_id.clone()).or_insert(idx);
        }

        Self {
            month,
            file_date,
            plans,
            plan_index,
            coverage,
        }
    }

    /// Plan that a coverage row's formulary id resolves to, if any
    pub fn plan_for(&self, formulary_id: &str) -> Option<&PlanRecord> {
        self.plan_index.get(formulary_id).map(|&idx| &self.plans[idx])
    }

    /// Formulary ids belonging to plans offered in `state`
    pub fn formulary_ids_in_state(&self, state: &str) -> HashSet<String> {
        self.plans
            .iter()
            .filter(|p| p.state == state)
            .map(|p| p.formulary_id.clone())
            .collect()
    }

    /// Formulary ids belonging to plans with the given plan id
    pub fn formulary_ids_for_plan(&self, plan_id: &str) -> HashSet<String> {
        self.plans
            .iter()
            .filter(|p| p.plan_id == plan_id)
            .map(|p| p.formulary_id.clone())
            .collect()
    }

    /// Number of plan records in this release
    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }
}

/// Produces a freshly parsed dataset on demand
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load(&self) -> Result<FormularyDataset>;
}

/// Production loader: release resolution followed by flat-file parsing
pub struct CmsDatasetLoader {
    resolver: ReleaseResolver,
}

impl CmsDatasetLoader {
    pub fn new(resolver: ReleaseResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl DatasetLoader for CmsDatasetLoader {
    async fn load(&self) -> Result<FormularyDataset> {
        let LocalRelease {
            month,
            file_date,
            extract_path,
        } = self.resolver.latest_local().await?;

        let dataset = tokio::task::spawn_blocking(move || -> Result<FormularyDataset> {
            let plan_path =
                parser::locate_data_file(&extract_path, parser::PLAN_FILE_KEYWORD)?;
            let coverage_path =
                parser::locate_data_file(&extract_path, parser::COVERAGE_FILE_KEYWORD)?;

            // The plan file is the small side of the join; index it fully,
            // then collect the coverage stream against it.
            let plans = parser::parse_plan_file(&plan_path)?;
            let coverage = parser::parse_coverage_file(&coverage_path)?;

            Ok(FormularyDataset::new(month, file_date, plans, coverage))
        })
        .await
        .map_err(|e| FormularyError::Internal {
            message: format!("dataset load task failed: {}", e),
        })??;

        info!(
            "Loaded formulary dataset {}: {} plans, {} coverage rows",
            dataset.month,
            dataset.plan_count(),
            dataset.coverage.len()
        );
        Ok(dataset)
    }
}

/// Hands out the current dataset to the search engine
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn current(&self) -> Result<Arc<FormularyDataset>>;
}

struct CachedDataset {
    loaded_at: DateTime<Utc>,
    dataset: Arc<FormularyDataset>,
}

struct CacheState {
    current: Option<CachedDataset>,
    ttl_seconds: u64,
}

/// TTL-bounded in-memory cache over a `DatasetLoader`.
///
/// Reloads happen outside the lock, so concurrent readers keep getting the
/// previous dataset until the fresh one is swapped in. A failed reload
/// propagates its error and leaves the previous dataset in place.
pub struct DatasetCache {
    loader: Arc<dyn DatasetLoader>,
    state: RwLock<CacheState>,
}

impl DatasetCache {
    /// Create a cache that reloads after `ttl_seconds`
    pub fn new(loader: Arc<dyn DatasetLoader>, ttl_seconds: u64) -> Self {
        Self {
            loader,
            state: RwLock::new(CacheState {
                current: None,
                ttl_seconds,
            }),
        }
    }

    /// Adjust the TTL window; zero forces a reload on the next access
    pub async fn invalidate_after(&self, ttl_seconds: u64) {
        self.state.write().await.ttl_seconds = ttl_seconds;
    }
}

#[async_trait]
impl DatasetProvider for DatasetCache {
    async fn current(&self) -> Result<Arc<FormularyDataset>> {
        {
            let state = self.state.read().await;
            if let Some(cached) = &state.current {
                let age = Utc::now()
                    .signed_duration_since(cached.loaded_at)
                    .num_seconds();
                if age < state.ttl_seconds as i64 {
                    return Ok(cached.dataset.clone());
                }
            }
        }

        let dataset = Arc::new(self.loader.load().await?);

        let mut state = self.state.write().await;
        state.current = Some(CachedDataset {
            loaded_at: Utc::now(),
            dataset: dataset.clone(),
        });
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::CatalogConfig;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plan(formulary_id: &str, plan_id: &str, name: &str, state: &str) -> PlanRecord {
        PlanRecord {
            contract_id: "H0001".to_string(),
            plan_id: plan_id.to_string(),
            segment_id: "0".to_string(),
            plan_name: name.to_string(),
            formulary_id: formulary_id.to_string(),
            state: state.to_string(),
        }
    }

    fn small_dataset(month: &str) -> FormularyDataset {
        FormularyDataset::new(
            month.to_string(),
            format!("{}-01", month),
            vec![
                plan("F1", "001", "Plan One", "CA"),
                plan("F1", "002", "Plan One Dup", "CA"),
                plan("F2", "003", "Plan Two", "TX"),
            ],
            Vec::new(),
        )
    }

    struct StubLoader {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl StubLoader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl DatasetLoader for StubLoader {
        async fn load(&self) -> Result<FormularyDataset> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FormularyError::SourceUnavailable {
                    source_name: "stub".to_string(),
                    details: "offline".to_string(),
                });
            }
            Ok(small_dataset(&format!("2025-{:02}", call + 1)))
        }
    }

    #[test]
    fn plan_index_keeps_first_occurrence() {
        let dataset = small_dataset("2025-06");
        assert_eq!(dataset.plan_for("F1").unwrap().plan_name, "Plan One");
        assert_eq!(dataset.plan_for("F2").unwrap().state, "TX");
        assert!(dataset.plan_for("F9").is_none());
    }

    #[test]
    fn state_and_plan_lookups_cover_all_plans() {
        let dataset = small_dataset("2025-06");
        let ca = dataset.formulary_ids_in_state("CA");
        assert!(ca.contains("F1"));
        assert!(!ca.contains("F2"));

        let by_plan = dataset.formulary_ids_for_plan("003");
        assert!(by_plan.contains("F2"));
        assert_eq!(by_plan.len(), 1);
    }

    #[tokio::test]
    async fn fresh_dataset_is_reused_within_ttl() {
        let loader = StubLoader::new();
        let cache = DatasetCache::new(loader.clone(), 3600);

        let first = cache.current().await.unwrap();
        let second = cache.current().await.unwrap();

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn expired_dataset_is_reloaded() {
        let loader = StubLoader::new();
        let cache = DatasetCache::new(loader.clone(), 3600);

        let first = cache.current().await.unwrap();
        cache.invalidate_after(0).await;
        let second = cache.current().await.unwrap();

        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.month, "2025-01");
        assert_eq!(second.month, "2025-02");
    }

    #[tokio::test]
    async fn loader_builds_dataset_from_downloaded_release() {
        const DATASET_TITLE: &str =
            "Monthly Prescription Drug Plan Formulary and Pharmacy Network Information";

        let coverage = "FORMULARY_ID|FORMULARY_VERSION|CONTRACT_YEAR|RXCUI|NDC|TIER_LEVEL_VALUE|QUANTITY_LIMIT_YN|QUANTITY_LIMIT_AMOUNT|QUANTITY_LIMIT_DAYS|PRIOR_AUTHORIZATION_YN|STEP_THERAPY_YN\nF1|v1|2025|12345|000111|2|N|||N|N\nF1|v1|2025|67890|000222|5|Y|30|30|Y|Y\n";
        let plans = "CONTRACT_ID|PLAN_ID|SEGMENT_ID|CONTRACT_NAME|PLAN_NAME|FORMULARY_ID|PREMIUM|DEDUCTIBLE|ICL|MA_REGION_CODE|STATE|COUNTY_CODE\nH1234|001|0|Contract A|Best Part D Plan|F1|12.30|480|5030|06|CA|06037\n";

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in [
            ("basic drugs formulary file 20250601.txt", coverage),
            ("plan information file 20250601.txt", plans),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "dataset": [{"title": DATASET_TITLE, "distribution": [
                    {"downloadURL": format!("{}/download/latest", server.uri()),
                     "title": format!("{} : 2025-06-18", DATASET_TITLE)}
                ]}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        let cache_dir = TempDir::new().unwrap();
        let store = CacheStore::new(cache_dir.path(), 30).unwrap();
        let resolver = ReleaseResolver::new(
            &CatalogConfig {
                base_url: server.uri(),
                dataset_title: DATASET_TITLE.to_string(),
                timeout_seconds: 5,
            },
            store,
        )
        .unwrap();

        let dataset = CmsDatasetLoader::new(resolver).load().await.unwrap();
        assert_eq!(dataset.month, "2025-06");
        assert_eq!(dataset.file_date, "2025-06-18");
        assert_eq!(dataset.plan_count(), 1);
        assert_eq!(dataset.coverage.len(), 2);
        assert_eq!(dataset.plan_for("F1").unwrap().plan_name, "Best Part D Plan");
        assert_eq!(dataset.coverage[1].quantity_limit_amount, "30");
    }

    #[tokio::test]
    async fn failed_reload_propagates_and_keeps_previous_dataset() {
        let loader = StubLoader::new();
        let cache = DatasetCache::new(loader.clone(), 3600);

        let first = cache.current().await.unwrap();

        // Force staleness, then make the loader fail
        cache.invalidate_after(0).await;
        loader.fail.store(true, Ordering::SeqCst);
        let err = cache.current().await.unwrap_err();
        assert!(matches!(err, FormularyError::SourceUnavailable { .. }));

        // Widening the TTL again shows the old instance survived the failure
        cache.invalidate_after(3600).await;
        let survivor = cache.current().await.unwrap();
        assert!(Arc::ptr_eq(&first, &survivor));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }
}
