//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the formulary search engine, covering the
//! full failure taxonomy from upstream CMS/RxNorm calls down to flat-file
//! location and query validation.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from all system components
//! - **Output**: Structured error types with context for logging and API mapping
//! - **Error Categories**: Query, Source, Upstream, Files, Parsing, Config, System
//!
//! ## Key Features
//! - Typed variants for every user-visible failure mode
//! - Automatic conversion from io/reqwest/serde_json errors
//! - Category tags for structured logging
//! - Recoverability hints for callers that can fall back to cached data

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, FormularyError>;

/// Error types for the formulary search engine
#[derive(Debug, Error)]
pub enum FormularyError {
    /// Request rejected before any I/O: no drug- or plan-identifying parameter
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Catalog or archive endpoint unreachable, or the dataset entry is absent
    #[error("Data source '{source_name}' is unavailable: {details}")]
    SourceUnavailable { source_name: String, details: String },

    /// Vocabulary lookup transport failure; never conflated with zero results
    #[error("Upstream service '{service}' failed: {details}")]
    UpstreamError { service: String, details: String },

    /// Expected reference file missing or ambiguous inside an extracted release
    #[error("Reference file not found in {dir}: {details}")]
    FileNotFound { dir: String, details: String },

    /// Data parsing errors
    #[error("Failed to parse data from {source_name}: {details}")]
    DataParsing { source_name: String, details: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FormularyError {
    /// Check if the error leaves room for a cache fallback or retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FormularyError::SourceUnavailable { .. } | FormularyError::Http(_)
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            FormularyError::InvalidQuery { .. } => "query",
            FormularyError::SourceUnavailable { .. } => "source",
            FormularyError::UpstreamError { .. } => "upstream",
            FormularyError::FileNotFound { .. } | FormularyError::DataParsing { .. } => "data",
            FormularyError::Config { .. } => "configuration",
            FormularyError::Io(_) | FormularyError::Http(_) | FormularyError::Json(_) => "transport",
            FormularyError::Internal { .. } => "internal",
        }
    }
}
