//! # Release Resolver Module
//!
//! ## Purpose
//! Discovers the latest monthly formulary release in the CMS data catalog,
//! downloads and extracts its archive into the release cache, and degrades to
//! the newest valid cached release when the catalog is unreachable.
//!
//! ## Input/Output Specification
//! - **Input**: Catalog discovery document (`data.json`), archive byte streams
//! - **Output**: A local extract directory for the resolved release month
//! - **Fallback Order**: live catalog first, newest valid cached release second,
//!   then the original failure propagates
//!
//! ## Key Features
//! - Release month parsed out of dated distribution titles
//! - Streamed archive download staged through a temp file
//! - tar+gzip extraction into month-scoped directories
//! - Manifest bookkeeping after every successful download

use crate::cache::{CacheStore, ReleaseManifestEntry};
use crate::config::CatalogConfig;
use crate::errors::{FormularyError, Result};
use chrono::Utc;
use flate2::read::GzDecoder;
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Latest-release descriptor resolved from the catalog
#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    /// Release month key (YYYY-MM)
    pub month: String,
    /// Archive download URL
    pub download_url: String,
    /// Source file date as published in the distribution title
    pub file_date: String,
}

/// A release that exists on local disk, ready to parse
#[derive(Debug, Clone)]
pub struct LocalRelease {
    pub month: String,
    pub file_date: String,
    pub extract_path: PathBuf,
}

/// Catalog discovery document (`data.json`)
#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    dataset: Vec<CatalogDataset>,
}

#[derive(Debug, Deserialize)]
struct CatalogDataset {
    #[serde(default)]
    title: String,
    #[serde(default)]
    distribution: Vec<CatalogDistribution>,
}

#[derive(Debug, Deserialize)]
struct CatalogDistribution {
    #[serde(rename = "downloadURL", default)]
    download_url: Option<String>,
    #[serde(default)]
    title: String,
}

/// Resolves and localizes monthly formulary releases
pub struct ReleaseResolver {
    client: Client,
    catalog_base: String,
    dataset_title: String,
    date_pattern: Regex,
    store: CacheStore,
}

impl ReleaseResolver {
    /// Create a new resolver over the given cache store
    pub fn new(config: &CatalogConfig, store: CacheStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("formulary-search/0.1")
            .build()
            .map_err(|e| FormularyError::Config {
                message: format!("Failed to build catalog HTTP client: {}", e),
            })?;

        let date_pattern =
            Regex::new(r"\d{4}-\d{2}-\d{2}").map_err(|e| FormularyError::Config {
                message: format!("Invalid release date pattern: {}", e),
            })?;

        Ok(Self {
            client,
            catalog_base: config.base_url.trim_end_matches('/').to_string(),
            dataset_title: config.dataset_title.clone(),
            date_pattern,
            store,
        })
    }

    /// Cache store backing this resolver
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Query the catalog for the latest release descriptor.
    ///
    /// The first distribution of the matching dataset is the latest. Any
    /// transport failure, unparseable payload, or absent dataset surfaces as
    /// `SourceUnavailable` so callers can attempt the cached fallback.
    pub async fn resolve_latest(&self) -> Result<ReleaseInfo> {
        let url = format!("{}/data.json", self.catalog_base);

        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| FormularyError::SourceUnavailable {
                    source_name: self.catalog_base.clone(),
                    details: e.to_string(),
                })?;

        if !response.status().is_success() {
            return Err(FormularyError::SourceUnavailable {
                source_name: self.catalog_base.clone(),
                details: format!("catalog returned HTTP {}", response.status()),
            });
        }

        let catalog: Catalog =
            response
                .json()
                .await
                .map_err(|e| FormularyError::SourceUnavailable {
                    source_name: self.catalog_base.clone(),
                    details: format!("unparseable catalog: {}", e),
                })?;

        let dataset = catalog
            .dataset
            .into_iter()
            .find(|d| d.title == self.dataset_title)
            .ok_or_else(|| FormularyError::SourceUnavailable {
                source_name: self.catalog_base.clone(),
                details: format!("dataset '{}' not present in catalog", self.dataset_title),
            })?;

        let latest = dataset.distribution.into_iter().next().ok_or_else(|| {
            FormularyError::SourceUnavailable {
                source_name: self.catalog_base.clone(),
                details: "dataset has no distributions".to_string(),
            }
        })?;

        let download_url =
            latest
                .download_url
                .ok_or_else(|| FormularyError::SourceUnavailable {
                    source_name: self.catalog_base.clone(),
                    details: "latest distribution has no download URL".to_string(),
                })?;

        let file_date = self
            .date_pattern
            .find(&latest.title)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let month = file_date.chars().take(7).collect::<String>();

        debug!(
            "Latest release: month={} file_date={} url={}",
            month, file_date, download_url
        );

        Ok(ReleaseInfo {
            month,
            download_url,
            file_date,
        })
    }

    /// Ensure a local extracted copy of `month` exists, returning its path.
    ///
    /// A valid cached entry short-circuits without network access; otherwise
    /// the archive is downloaded, extracted, and recorded in the manifest.
    pub async fn ensure_local(&self, month: &str, download_url: &str) -> Result<PathBuf> {
        let mut manifest = self.store.load_manifest();

        if let Some(entry) = manifest.get(month) {
            if self.store.is_valid(entry) {
                debug!("Using cached release for {}", month);
                return Ok(entry.extract_path.clone());
            }
        }

        info!("Cache miss or invalid, downloading release for {}", month);
        let archive_path = self.download_archive(download_url, month).await?;
        let extract_path = self.extract_archive(&archive_path, month)?;

        manifest.insert(
            month.to_string(),
            ReleaseManifestEntry {
                month: month.to_string(),
                download_date: Utc::now(),
                archive_path,
                extract_path: extract_path.clone(),
                file_hashes: BTreeMap::new(),
            },
        );
        self.store.save_manifest(&manifest)?;

        Ok(extract_path)
    }

    /// Resolve the latest release and make it available locally.
    ///
    /// Strategies in order: (1) live catalog resolution plus `ensure_local`;
    /// (2) the newest valid cached release. When neither works, the catalog
    /// failure is what propagates, so callers see why the network path died.
    pub async fn latest_local(&self) -> Result<LocalRelease> {
        let info = match self.resolve_latest().await {
            Ok(info) => info,
            Err(err) => {
                warn!("Catalog lookup failed ({}), trying cached releases", err);
                return match self.newest_cached() {
                    Some(release) => {
                        info!("Serving cached release {}", release.month);
                        Ok(release)
                    }
                    None => Err(err),
                };
            }
        };

        let extract_path = self.ensure_local(&info.month, &info.download_url).await?;
        Ok(LocalRelease {
            month: info.month,
            file_date: info.file_date,
            extract_path,
        })
    }

    /// Newest valid cached release, with the download date standing in for
    /// the file date the catalog would have supplied
    fn newest_cached(&self) -> Option<LocalRelease> {
        let manifest = self.store.load_manifest();
        self.store
            .newest_valid_entry(&manifest)
            .map(|entry| LocalRelease {
                month: entry.month,
                file_date: entry.download_date.format("%Y-%m-%d").to_string(),
                extract_path: entry.extract_path,
            })
    }

    /// Stream the archive to a temp file in the cache root, then persist it
    async fn download_archive(&self, url: &str, month: &str) -> Result<PathBuf> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| FormularyError::SourceUnavailable {
                    source_name: url.to_string(),
                    details: e.to_string(),
                })?;

        if !response.status().is_success() {
            return Err(FormularyError::SourceUnavailable {
                source_name: url.to_string(),
                details: format!("download returned HTTP {}", response.status()),
            });
        }

        let mut staging = NamedTempFile::new_in(self.store.root())?;
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FormularyError::SourceUnavailable {
                source_name: url.to_string(),
                details: format!("download interrupted: {}", e),
            })?;
            staging.write_all(&chunk)?;
            bytes_written += chunk.len() as u64;
        }
        staging.flush()?;

        let archive_path = self.store.archive_path(month);
        staging
            .persist(&archive_path)
            .map_err(|e| FormularyError::Io(e.error))?;

        info!("Downloaded {} bytes to {:?}", bytes_written, archive_path);
        Ok(archive_path)
    }

    /// Unpack a gzip-compressed tar archive into the month's extract directory
    fn extract_archive(&self, archive_path: &Path, month: &str) -> Result<PathBuf> {
        let extract_path = self.store.extract_path(month);
        std::fs::create_dir_all(&extract_path)?;

        let file = File::open(archive_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(&extract_path)?;

        info!("Extracted release {} to {:?}", month, extract_path);
        Ok(extract_path)
    }
}
