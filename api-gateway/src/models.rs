// ==============================================================================
// models.rs - API Data Models
// ==============================================================================
// Description: Response models for the PGx API (reports come from the
//              processor crate unchanged)
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-02-09
// Version: 2.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

/// API information response
#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub knowledge_base_version: String,
    pub explanations_enabled: bool,
}

/// One drug of the supported panel
#[derive(Debug, Serialize)]
pub struct PanelDrug {
    pub drug: String,
    pub pathway: String,
    pub evidence_level: String,
    pub guideline: String,
    /// Governing genes, primary first
    pub genes: Vec<String>,
}

/// Supported panel response
#[derive(Debug, Serialize)]
pub struct PanelResponse {
    pub knowledge_base_version: String,
    pub precedence_policy: String,
    pub drugs: Vec<PanelDrug>,
    pub genes: Vec<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}
