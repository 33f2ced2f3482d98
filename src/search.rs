//! # Search Engine Module
//!
//! ## Purpose
//! The formulary search engine: validates queries, resolves free-text drug
//! names to canonical identifiers, filters the in-memory coverage rows with
//! conjunctive predicates, and returns a deterministic, enriched page.
//!
//! ## Input/Output Specification
//! - **Input**: Search parameters (drug/NDC/plan identity, coverage filters,
//!   pagination)
//! - **Output**: Total match count, page of enriched entries, data-source
//!   descriptor
//! - **Ordering**: Original file order; no implicit sort is applied
//!
//! ## Key Features
//! - Fail-fast validation before any I/O
//! - Zero-identifier short circuit with a diagnostic payload
//! - Optional predicates ANDed together; absent UM flags skip their filter
//!   entirely rather than matching "false"
//! - Full-count pagination: every match is counted, entries materialize only
//!   inside the requested window

use crate::config::SearchConfig;
use crate::dataset::{DatasetProvider, FormularyDataset};
use crate::errors::{FormularyError, Result};
use crate::parser::CoverageRecord;
use crate::vocab::DrugResolver;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Parameters for a formulary search
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Free-text drug name, resolved to RXCUIs before filtering
    pub drug_name: Option<String>,
    /// Exact national drug code
    pub ndc_code: Option<String>,
    /// Tier number (1-6 in published data)
    pub tier: Option<u32>,
    /// Prior authorization flag filter; absent means "any"
    pub requires_prior_auth: Option<bool>,
    /// Quantity limit flag filter; absent means "any"
    pub has_quantity_limit: Option<bool>,
    /// Step therapy flag filter; absent means "any"
    pub has_step_therapy: Option<bool>,
    /// Two-letter state abbreviation, resolved through plan records
    pub plan_state: Option<String>,
    /// Part D plan id, resolved through plan records
    pub plan_id: Option<String>,
    /// Page size; missing or non-positive falls back to the endpoint default
    pub size: Option<i64>,
    /// 0-based offset into the filtered set
    pub offset: Option<i64>,
}

/// One enriched coverage entry
#[derive(Debug, Clone, Serialize)]
pub struct FormularyEntry {
    pub formulary_id: String,
    /// Plan name from the joined plan record, or "Unknown"
    pub plan_name: String,
    /// Plan state from the joined plan record, or "Unknown"
    pub state: String,
    pub rxcui: String,
    pub ndc: String,
    /// Tier identifier as published
    pub tier_id: String,
    /// Human-readable tier label
    pub tier_level: String,
    pub prior_authorization: bool,
    pub quantity_limit: bool,
    pub quantity_limit_amount: String,
    pub quantity_limit_days: String,
    pub step_therapy: bool,
}

/// Descriptor of the dataset a result page came from
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceInfo {
    pub dataset: String,
    pub month: String,
    pub file_date: String,
}

/// Search result: full match count plus one page of entries
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Matches across the whole filtered set, before pagination
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drug_name_searched: Option<String>,
    pub rxcuis_found: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub formulary_entries: Vec<FormularyEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceInfo>,
}

/// Fixed tier-number descriptions published for Part D formularies
pub fn tier_description(tier_id: &str) -> Option<&'static str> {
    match tier_id {
        "1" => Some("Preferred Generic"),
        "2" => Some("Generic"),
        "3" => Some("Preferred Brand"),
        "4" => Some("Non-Preferred Brand"),
        "5" => Some("Specialty Tier"),
        "6" => Some("Select Care Drugs"),
        _ => None,
    }
}

/// Y/N utilization-management flag comparison; `false` matches only an
/// explicit N, so blank flags never satisfy a negative filter
fn um_flag_matches(raw: &str, wanted: bool) -> bool {
    let target = if wanted { "Y" } else { "N" };
    raw.trim().eq_ignore_ascii_case(target)
}

/// Trimmed, non-empty string parameter
fn normalized(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Main search engine over the shared dataset cache
pub struct SearchEngine {
    datasets: Arc<dyn DatasetProvider>,
    drugs: Arc<dyn DrugResolver>,
    config: SearchConfig,
    dataset_label: String,
}

impl SearchEngine {
    /// Create a new search engine with injected dataset and drug resolvers
    pub fn new(
        datasets: Arc<dyn DatasetProvider>,
        drugs: Arc<dyn DrugResolver>,
        config: SearchConfig,
        dataset_label: String,
    ) -> Self {
        Self {
            datasets,
            drugs,
            config,
            dataset_label,
        }
    }

    /// Canonical search entry point (default page size 25)
    pub async fn search(&self, params: SearchParams) -> Result<SearchResult> {
        let default_size = self.config.default_page_size;
        self.search_sized(params, default_size).await
    }

    /// Coverage-analysis convenience: one drug across all plans (page size 100)
    pub async fn drug_coverage(&self, drug_name: &str) -> Result<SearchResult> {
        let params = SearchParams {
            drug_name: Some(drug_name.to_string()),
            ..Default::default()
        };
        self.search_sized(params, self.config.coverage_page_size).await
    }

    /// Plan-scoped convenience: one plan's formulary, optionally one tier
    pub async fn plan_formulary(
        &self,
        plan_id: &str,
        tier: Option<u32>,
        size: Option<i64>,
        offset: Option<i64>,
    ) -> Result<SearchResult> {
        let params = SearchParams {
            plan_id: Some(plan_id.to_string()),
            tier,
            size,
            offset,
            ..Default::default()
        };
        self.search_sized(params, self.config.coverage_page_size).await
    }

    async fn search_sized(&self, params: SearchParams, default_size: usize) -> Result<SearchResult> {
        self.validate(&params)?;

        let SearchParams {
            drug_name,
            ndc_code,
            tier,
            requires_prior_auth,
            has_quantity_limit,
            has_step_therapy,
            plan_state,
            plan_id,
            size,
            offset,
        } = params;

        let limit = match size {
            Some(s) if s > 0 => s as usize,
            _ => default_size,
        };
        let offset = offset.filter(|o| *o > 0).unwrap_or(0) as usize;

        // Resolve the drug name first; an empty identifier set is a normal
        // zero-result outcome and must not touch the dataset at all.
        let drug_name = normalized(drug_name);
        let rxcuis = match &drug_name {
            Some(name) => Some(self.drugs.resolve(name).await?),
            None => None,
        };

        if let Some(ids) = &rxcuis {
            if ids.is_empty() {
                let name = drug_name.clone().unwrap_or_default();
                debug!("No RXCUI identifiers for '{}', short-circuiting", name);
                return Ok(SearchResult {
                    total: 0,
                    offset,
                    limit,
                    drug_name_searched: drug_name,
                    rxcuis_found: Vec::new(),
                    message: Some(format!("No RXCUI codes found for drug name: {}", name)),
                    formulary_entries: Vec::new(),
                    data_source: None,
                });
            }
        }

        let dataset = self.datasets.current().await?;

        let rxcui_set: Option<HashSet<&str>> = rxcuis
            .as_ref()
            .map(|ids| ids.iter().map(String::as_str).collect());
        let ndc = normalized(ndc_code);
        let tier = tier.map(|t| t.to_string());
        let state_set = normalized(plan_state).map(|s| dataset.formulary_ids_in_state(&s));
        let plan_set = normalized(plan_id).map(|p| dataset.formulary_ids_for_plan(&p));

        let mut total = 0usize;
        let mut entries = Vec::new();

        for record in &dataset.coverage {
            if let Some(set) = &rxcui_set {
                if !set.contains(record.rxcui.as_str()) {
                    continue;
                }
            }
            if let Some(ndc) = &ndc {
                if record.ndc != *ndc {
                    continue;
                }
            }
            if let Some(plan_set) = &plan_set {
                if !plan_set.contains(&record.formulary_id) {
                    continue;
                }
            }
            if let Some(state_set) = &state_set {
                if !state_set.contains(&record.formulary_id) {
                    continue;
                }
            }
            if let Some(tier) = &tier {
                if record.tier.trim() != tier {
                    continue;
                }
            }
            if let Some(wanted) = requires_prior_auth {
                if !um_flag_matches(&record.prior_authorization, wanted) {
                    continue;
                }
            }
            if let Some(wanted) = has_quantity_limit {
                if !um_flag_matches(&record.quantity_limit, wanted) {
                    continue;
                }
            }
            if let Some(wanted) = has_step_therapy {
                if !um_flag_matches(&record.step_therapy, wanted) {
                    continue;
                }
            }

            // Entries materialize only inside the page window; counting
            // continues so `total` reflects the whole filtered set.
            if total >= offset && entries.len() < limit {
                entries.push(enrich(record, &dataset));
            }
            total += 1;
        }

        Ok(SearchResult {
            total,
            offset,
            limit,
            drug_name_searched: drug_name,
            rxcuis_found: rxcuis.unwrap_or_default(),
            message: None,
            formulary_entries: entries,
            data_source: Some(DataSourceInfo {
                dataset: self.dataset_label.clone(),
                month: dataset.month.clone(),
                file_date: dataset.file_date.clone(),
            }),
        })
    }

    /// At least one drug- or plan-identifying parameter must be present,
    /// checked before any resolver or dataset access
    fn validate(&self, params: &SearchParams) -> Result<()> {
        let present =
            |v: &Option<String>| v.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(false);

        if !present(&params.drug_name)
            && !present(&params.ndc_code)
            && !present(&params.plan_id)
        {
            return Err(FormularyError::InvalidQuery {
                reason: "at least one of drug_name, ndc_code, or plan_id is required".to_string(),
            });
        }

        Ok(())
    }
}

/// Join a coverage record with its plan and tier metadata
fn enrich(record: &CoverageRecord, dataset: &FormularyDataset) -> FormularyEntry {
    let (plan_name, state) = match dataset.plan_for(&record.formulary_id) {
        Some(plan) => (plan.plan_name.clone(), plan.state.clone()),
        None => ("Unknown".to_string(), "Unknown".to_string()),
    };

    let tier_id = record.tier.trim().to_string();
    let tier_level = match tier_description(&tier_id) {
        Some(label) => label.to_string(),
        None if !tier_id.is_empty() => tier_id.clone(),
        None => "Unknown Tier".to_string(),
    };

    FormularyEntry {
        formulary_id: record.formulary_id.clone(),
        plan_name,
        state,
        rxcui: record.rxcui.clone(),
        ndc: record.ndc.clone(),
        tier_id,
        tier_level,
        prior_authorization: um_flag_matches(&record.prior_authorization, true),
        quantity_limit: um_flag_matches(&record.quantity_limit, true),
        quantity_limit_amount: record.quantity_limit_amount.clone(),
        quantity_limit_days: record.quantity_limit_days.clone(),
        step_therapy: um_flag_matches(&record.step_therapy, true),
    }
}
