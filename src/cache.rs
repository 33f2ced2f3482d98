//! # Release Cache Module
//!
//! ## Purpose
//! Manages the on-disk cache of downloaded monthly formulary releases: a JSON
//! manifest describing each cached month plus per-month archive files and
//! extraction directories under a single cache root.
//!
//! ## Input/Output Specification
//! - **Input**: Manifest reads/writes, validity checks against the retention window
//! - **Output**: Manifest maps keyed by release month, newest-valid selection
//! - **Storage**: `<root>/cache-manifest.json`, `<root>/<month>.tgz`, `<root>/<month>/`
//!
//! ## Key Features
//! - Corrupt or missing manifest degrades to an empty manifest, never an error
//! - Validity = age under the retention window AND archive + extract paths on disk
//! - Newest-valid lookup backing the offline fallback path

use crate::errors::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Manifest file name inside the cache root
const MANIFEST_FILE: &str = "cache-manifest.json";

/// Manifest map: release month (YYYY-MM) to its cache entry.
///
/// A BTreeMap keeps months in ascending order, so the newest release is the
/// last key.
pub type Manifest = BTreeMap<String, ReleaseManifestEntry>;

/// One cached monthly release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifestEntry {
    /// Release month key (YYYY-MM)
    pub month: String,
    /// When the archive was downloaded
    pub download_date: DateTime<Utc>,
    /// Path to the downloaded archive
    pub archive_path: PathBuf,
    /// Path to the extracted release directory
    pub extract_path: PathBuf,
    /// Per-file content hashes, reserved for integrity checks (written empty)
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
}

/// Directory-based cache of monthly releases
pub struct CacheStore {
    root: PathBuf,
    retention: Duration,
}

impl CacheStore {
    /// Create a cache store rooted at `root`, creating the directory if absent
    pub fn new<P: AsRef<Path>>(root: P, retention_days: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            retention: Duration::days(retention_days as i64),
        })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path where a month's archive is stored
    pub fn archive_path(&self, month: &str) -> PathBuf {
        self.root.join(format!("{}.tgz", month))
    }

    /// Directory a month's archive is extracted into
    pub fn extract_path(&self, month: &str) -> PathBuf {
        self.root.join(month)
    }

    /// Load the manifest; missing or corrupt files yield an empty manifest
    pub fn load_manifest(&self) -> Manifest {
        let path = self.root.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Manifest::new(),
        };

        match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("Discarding corrupt cache manifest {:?}: {}", path, e);
                Manifest::new()
            }
        }
    }

    /// Persist the manifest as a whole
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.root.join(MANIFEST_FILE), content)?;
        Ok(())
    }

    /// Check whether a cached release is still usable.
    ///
    /// The check is age plus path existence only; the reserved hash map is
    /// not verified, so a partially extracted directory passes.
    pub fn is_valid(&self, entry: &ReleaseManifestEntry) -> bool {
        let age = Utc::now().signed_duration_since(entry.download_date);

        age < self.retention && entry.archive_path.exists() && entry.extract_path.exists()
    }

    /// Most recent manifest entry that is still valid, if any
    pub fn newest_valid_entry(&self, manifest: &Manifest) -> Option<ReleaseManifestEntry> {
        manifest
            .values()
            .rev()
            .find(|entry| self.is_valid(entry))
            .cloned()
    }
}
