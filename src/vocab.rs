//! # Drug Vocabulary Module
//!
//! ## Purpose
//! Resolves free-text drug names to canonical RXCUI identifiers through the
//! RxNorm REST service. The resolver sits behind a trait so the search engine
//! can be exercised without network access.
//!
//! ## Input/Output Specification
//! - **Input**: Free-text drug name (brand or generic)
//! - **Output**: RXCUI identifier list from the first non-empty concept group
//! - **Failure Modes**: Transport or parse failures surface as `UpstreamError`;
//!   a name that matches nothing is a normal empty result, not an error
//!
//! ## Key Features
//! - One shared HTTP client with timeout and user agent
//! - Strict separation of "found nothing" from "could not search"

use crate::config::RxNormConfig;
use crate::errors::{FormularyError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Maps a free-text drug name to canonical identifiers
#[async_trait]
pub trait DrugResolver: Send + Sync {
    /// Resolve a drug name to RXCUI identifiers; empty means "no match"
    async fn resolve(&self, drug_name: &str) -> Result<Vec<String>>;
}

/// RxNorm-backed drug resolver
pub struct RxNormClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DrugsResponse {
    #[serde(rename = "drugGroup")]
    drug_group: Option<DrugGroup>,
}

#[derive(Debug, Deserialize)]
struct DrugGroup {
    #[serde(rename = "conceptGroup", default)]
    concept_group: Vec<ConceptGroup>,
}

#[derive(Debug, Deserialize)]
struct ConceptGroup {
    #[serde(rename = "conceptProperties", default)]
    concept_properties: Vec<ConceptProperty>,
}

#[derive(Debug, Deserialize)]
struct ConceptProperty {
    rxcui: String,
}

impl RxNormClient {
    /// Create a new RxNorm client from configuration
    pub fn new(config: &RxNormConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("formulary-search/0.1")
            .build()
            .map_err(|e| FormularyError::Config {
                message: format!("Failed to build RxNorm HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DrugResolver for RxNormClient {
    async fn resolve(&self, drug_name: &str) -> Result<Vec<String>> {
        let url = format!("{}/drugs.json", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("name", drug_name)])
            .send()
            .await
            .map_err(|e| FormularyError::UpstreamError {
                service: "RxNorm".to_string(),
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FormularyError::UpstreamError {
                service: "RxNorm".to_string(),
                details: format!("HTTP {}", response.status()),
            });
        }

        let payload: DrugsResponse =
            response
                .json()
                .await
                .map_err(|e| FormularyError::UpstreamError {
                    service: "RxNorm".to_string(),
                    details: format!("unparseable response: {}", e),
                })?;

        // First concept group with members carries the canonical identifiers
        let rxcuis = payload
            .drug_group
            .map(|group| {
                group
                    .concept_group
                    .into_iter()
                    .find(|g| !g.concept_properties.is_empty())
                    .map(|g| {
                        g.concept_properties
                            .into_iter()
                            .map(|p| p.rxcui)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        debug!(
            "RxNorm resolved '{}' to {} identifiers",
            drug_name,
            rxcuis.len()
        );
        Ok(rxcuis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RxNormClient {
        RxNormClient::new(&RxNormConfig {
            base_url: server.uri(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn first_non_empty_concept_group_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drugs.json"))
            .and(query_param("name", "metformin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "drugGroup": {
                    "conceptGroup": [
                        {"tty": "BPCK"},
                        {"tty": "SBD", "conceptProperties": [
                            {"rxcui": "861007", "name": "metFORMIN 500 MG"},
                            {"rxcui": "861010", "name": "metFORMIN 850 MG"}
                        ]},
                        {"tty": "SCD", "conceptProperties": [
                            {"rxcui": "999999", "name": "ignored later group"}
                        ]}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let rxcuis = client_for(&server).resolve("metformin").await.unwrap();
        assert_eq!(rxcuis, vec!["861007".to_string(), "861010".to_string()]);
    }

    #[tokio::test]
    async fn unknown_name_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drugs.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "drugGroup": {"name": "zzzznotadrug"}
            })))
            .mount(&server)
            .await;

        let rxcuis = client_for(&server).resolve("zzzznotadrug").await.unwrap();
        assert!(rxcuis.is_empty());
    }

    #[tokio::test]
    async fn http_failure_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drugs.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).resolve("metformin").await.unwrap_err();
        assert!(matches!(err, FormularyError::UpstreamError { .. }));
    }

    #[tokio::test]
    async fn garbage_body_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drugs.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>down</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).resolve("metformin").await.unwrap_err();
        assert!(matches!(err, FormularyError::UpstreamError { .. }));
    }
}
