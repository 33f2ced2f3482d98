//! # API Server Module
//!
//! ## Purpose
//! REST surface over the formulary search engine: a single search endpoint
//! plus health and index pages, with structured JSON error responses.
//!
//! ## Input/Output Specification
//! - **Input**: HTTP requests carrying search parameters as JSON
//! - **Output**: JSON search results, health status, error envelopes
//! - **Endpoints**: `POST /search_formulary`, `GET /health`, `GET /`
//!
//! ## Key Features
//! - Error-to-status mapping that distinguishes caller mistakes from
//!   upstream outages
//! - Config-gated CORS for browser frontends
//! - Worker count tuned from configuration

use crate::errors::{FormularyError, Result};
use crate::search::SearchParams;
use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, Result as ActixResult};
use serde::Serialize;

/// API server wrapping the shared application state
pub struct ApiServer {
    app_state: crate::AppState,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dataset: String,
}

impl ApiServer {
    /// Create new API server
    pub async fn new(app_state: crate::AppState) -> Result<Self> {
        Ok(Self { app_state })
    }

    /// Run the API server until the process is stopped
    pub async fn run(self) -> Result<()> {
        let config = self.app_state.config.clone();
        let bind_addr = format!("{}:{}", config.server.host, config.server.port);
        let enable_cors = config.server.enable_cors;
        let app_state = self.app_state;

        tracing::info!("Starting API server on {}", bind_addr);

        let server = HttpServer::new(move || {
            let cors = if enable_cors {
                Cors::permissive()
            } else {
                Cors::default()
            };

            App::new()
                .wrap(cors)
                .app_data(web::Data::new(app_state.clone()))
                .route("/search_formulary", web::post().to(search_handler))
                .route("/health", web::get().to(health_handler))
                .route("/", web::get().to(index_handler))
        })
        .workers(config.server.workers.max(1))
        .bind(&bind_addr)
        .map_err(|e| FormularyError::Internal {
            message: format!("Failed to bind server to {}: {}", bind_addr, e),
        })?
        .run();

        server.await.map_err(|e| FormularyError::Internal {
            message: format!("Server error: {}", e),
        })?;

        Ok(())
    }
}

/// Map an engine failure onto an HTTP response.
///
/// Caller mistakes are 400s; upstream outages (catalog, vocabulary service)
/// are 502s so clients can distinguish "fix your request" from "try later".
fn error_response(err: &FormularyError) -> HttpResponse {
    let status = match err {
        FormularyError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
        FormularyError::SourceUnavailable { .. } | FormularyError::UpstreamError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    HttpResponse::build(status).json(serde_json::json!({
        "error": err.to_string(),
        "category": err.category(),
    }))
}

/// Formulary search endpoint handler
async fn search_handler(
    app_state: web::Data<crate::AppState>,
    request: web::Json<SearchParams>,
) -> ActixResult<HttpResponse> {
    match app_state.search_engine.search(request.into_inner()).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(e) => {
            tracing::error!("Search error ({}): {}", e.category(), e);
            Ok(error_response(&e))
        }
    }
}

/// Health check endpoint handler
async fn health_handler(app_state: web::Data<crate::AppState>) -> ActixResult<HttpResponse> {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dataset: app_state.config.catalog.dataset_title.clone(),
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Index page handler
async fn index_handler() -> ActixResult<HttpResponse> {
    let html = r#"
    <!DOCTYPE html>
    <html>
    <head>
        <title>Formulary Search</title>
        <style>
            body { font-family: Arial, sans-serif; margin: 40px; }
            .header { color: #2c3e50; }
            .endpoint { margin: 20px 0; padding: 15px; background: #f8f9fa; border-radius: 5px; }
            .method { font-weight: bold; color: #27ae60; }
        </style>
    </head>
    <body>
        <h1 class="header">Formulary Search API</h1>
        <p>Search Medicare Part D formulary coverage from the latest monthly CMS release.</p>

        <h2>Available Endpoints</h2>

        <div class="endpoint">
            <span class="method">POST</span> /search_formulary
            <p>Search formulary coverage by drug name, NDC, plan, tier, state, or UM flags.</p>
        </div>

        <div class="endpoint">
            <span class="method">GET</span> /health
            <p>Check the service status.</p>
        </div>

        <h2>Example Search Request</h2>
        <pre>{
  "drug_name": "metformin",
  "plan_state": "CA",
  "tier": 2,
  "size": 25
}</pre>
    </body>
    </html>
    "#;

    Ok(HttpResponse::Ok().content_type("text/html").body(html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_query_maps_to_bad_request() {
        let response = error_response(&FormularyError::InvalidQuery {
            reason: "missing identifiers".to_string(),
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn infrastructure_failures_map_to_bad_gateway() {
        let response = error_response(&FormularyError::SourceUnavailable {
            source_name: "data.cms.gov".to_string(),
            details: "timeout".to_string(),
        });
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = error_response(&FormularyError::UpstreamError {
            service: "RxNorm".to_string(),
            details: "connection reset".to_string(),
        });
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn everything_else_is_internal() {
        let response = error_response(&FormularyError::Internal {
            message: "boom".to_string(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
