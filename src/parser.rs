//! # Flat-File Parser Module
//!
//! ## Purpose
//! Locates and streams the two pipe-delimited reference files inside an
//! extracted monthly release: the plan information file and the formulary
//! coverage file. Records are produced line by line so multi-hundred-thousand
//! row files are never buffered whole.
//!
//! ## Input/Output Specification
//! - **Input**: Extract directory, optionally gzip-compressed `.txt` files
//! - **Output**: `PlanRecord` / `CoverageRecord` streams in file order
//! - **Layout**: First line is a header and is always skipped; fields are
//!   fixed pipe-delimited positions; absent fields degrade to empty strings
//!
//! ## Key Features
//! - Case-insensitive keyword file matching with decoy exclusion
//! - Deterministic failure on zero or multiple candidate files
//! - Transparent gzip support for `.txt.gz` variants

use crate::errors::{FormularyError, Result};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Keyword identifying the formulary coverage file
pub const COVERAGE_FILE_KEYWORD: &str = "formulary";

/// Keyword identifying the plan information file
pub const PLAN_FILE_KEYWORD: &str = "plan";

/// File name substrings that disqualify a candidate (cost/excluded variants)
const DECOY_SUBSTRINGS: &[&str] = &["cost", "excluded"];

/// One row of the plan information file
#[derive(Debug, Clone, Serialize)]
pub struct PlanRecord {
    pub contract_id: String,
    pub plan_id: String,
    pub segment_id: String,
    pub plan_name: String,
    /// Join key to coverage rows
    pub formulary_id: String,
    pub state: String,
}

/// One row of the formulary coverage file
#[derive(Debug, Clone, Serialize)]
pub struct CoverageRecord {
    /// Join key to the plan file
    pub formulary_id: String,
    /// Canonical drug identifier (RXCUI)
    pub rxcui: String,
    /// National drug code
    pub ndc: String,
    /// Tier identifier as published
    pub tier: String,
    /// Quantity limit flag, Y/N
    pub quantity_limit: String,
    pub quantity_limit_amount: String,
    pub quantity_limit_days: String,
    /// Prior authorization flag, Y/N
    pub prior_authorization: String,
    /// Step therapy flag, Y/N
    pub step_therapy: String,
}

/// Locate the single data file in `dir` whose name contains `keyword`.
///
/// Matching is case-insensitive and restricted to `.txt` / `.txt.gz` files;
/// names containing a decoy substring are skipped. Zero or multiple matches
/// fail with `FileNotFound` so releases with surprising layouts are rejected
/// deterministically instead of silently picking a listing-order winner.
pub fn locate_data_file(dir: &Path, keyword: &str) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    let mut listing = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let lowered = name.to_lowercase();
        listing.push(name.clone());

        let extension_ok = lowered.ends_with(".txt") || lowered.ends_with(".txt.gz");
        let decoy = DECOY_SUBSTRINGS.iter().any(|d| lowered.contains(d));

        if extension_ok && !decoy && lowered.contains(keyword) {
            candidates.push(entry.path());
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(FormularyError::FileNotFound {
            dir: dir.display().to_string(),
            details: format!(
                "no file matching '{}' among: {}",
                keyword,
                listing.join(", ")
            ),
        }),
        _ => Err(FormularyError::FileNotFound {
            dir: dir.display().to_string(),
            details: format!(
                "ambiguous matches for '{}': {}",
                keyword,
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
    }
}

/// Open a buffered line reader over `path`, decompressing `.gz` transparently
fn open_lines(path: &Path) -> Result<Lines<BufReader<Box<dyn std::io::Read + Send>>>> {
    let file = File::open(path)?;
    let is_gzip = path
        .to_string_lossy()
        .to_lowercase()
        .ends_with(".gz");

    let reader: Box<dyn std::io::Read + Send> = if is_gzip {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };

    Ok(BufReader::new(reader).lines())
}

/// Field at pipe-delimited position `idx`, or an empty string when the line
/// is shorter than expected
fn field(values: &[&str], idx: usize) -> String {
    values.get(idx).map(|v| v.trim()).unwrap_or("").to_string()
}

/// Parse the plan information file into records, header skipped.
///
/// Column positions follow the CMS plan information layout: contract id,
/// plan id, segment id at 0-2, plan name at 4, formulary id at 5, state
/// at 10.
pub fn parse_plan_file(path: &Path) -> Result<Vec<PlanRecord>> {
    let mut records = Vec::new();

    for (line_no, line) in open_lines(path)?.enumerate() {
        let line = line.map_err(|e| FormularyError::DataParsing {
            source_name: path.display().to_string(),
            details: e.to_string(),
        })?;
        if line_no == 0 {
            continue;
        }
        if line.is_empty() {
            continue;
        }

        let values: Vec<&str> = line.split('|').collect();
        records.push(PlanRecord {
            contract_id: field(&values, 0),
            plan_id: field(&values, 1),
            segment_id: field(&values, 2),
            plan_name: field(&values, 4),
            formulary_id: field(&values, 5),
            state: field(&values, 10),
        });
    }

    tracing::debug!("Parsed {} plan records from {:?}", records.len(), path);
    Ok(records)
}

/// Parse the formulary coverage file into records, header skipped.
///
/// Column positions follow the CMS basic formulary layout: formulary id at 0,
/// rxcui at 3, ndc at 4, tier at 5, quantity limit Y/N + amount + days at
/// 6-8, prior authorization at 9, step therapy at 10.
pub fn parse_coverage_file(path: &Path) -> Result<Vec<CoverageRecord>> {
    let mut records = Vec::new();

    for (line_no, line) in open_lines(path)?.enumerate() {
        let line = line.map_err(|e| FormularyError::DataParsing {
            source_name: path.display().to_string(),
            details: e.to_string(),
        })?;
        if line_no == 0 {
            continue;
        }
        if line.is_empty() {
            continue;
        }

        let values: Vec<&str> = line.split('|').collect();
        records.push(CoverageRecord {
            formulary_id: field(&values, 0),
            rxcui: field(&values, 3),
            ndc: field(&values, 4),
            tier: field(&values, 5),
            quantity_limit: field(&values, 6),
            quantity_limit_amount: field(&values, 7),
            quantity_limit_days: field(&values, 8),
            prior_authorization: field(&values, 9),
            step_therapy: field(&values, 10),
        });
    }

    tracing::debug!("Parsed {} coverage records from {:?}", records.len(), path);
    Ok(records)
}
