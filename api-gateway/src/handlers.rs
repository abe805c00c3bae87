// ==============================================================================
// handlers.rs - API Request Handlers
// ==============================================================================
// Description: HTTP request handlers for the PGx analysis API
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-02-09
// Version: 2.0.0
// ==============================================================================

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use pgx_processor::{AnalysisReport, AnalysisRequest, InputError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{models::*, state::AppState};

/// Root endpoint - API information
pub async fn root() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        service: "PGx API Gateway",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "/api/pgx/health - Health check",
            "/api/pgx/panel - Supported drugs and genes (GET)",
            "/api/pgx/analyze - Analyse a VCF against drugs (POST multipart: file, drugs, patient_id)",
        ],
    })
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        started_at: state.started_at(),
        knowledge_base_version: state.knowledge_base().version().to_string(),
        explanations_enabled: state.processor().explanations_enabled(),
    })
}

/// Supported panel endpoint
pub async fn panel(State(state): State<AppState>) -> Json<PanelResponse> {
    let kb = state.knowledge_base();

    let drugs = kb
        .supported_drugs()
        .into_iter()
        .filter_map(|name| kb.drug(name))
        .map(|def| PanelDrug {
            drug: def.drug.clone(),
            pathway: def.pathway.clone(),
            evidence_level: def.evidence_level.clone(),
            guideline: def.guideline.clone(),
            genes: kb.genes_for(&def.drug).iter().map(|g| g.gene.clone()).collect(),
        })
        .collect();

    Json(PanelResponse {
        knowledge_base_version: kb.version().to_string(),
        precedence_policy: state.processor().precedence().to_string(),
        drugs,
        genes: kb.supported_genes(),
    })
}

/// Analysis endpoint (VCF upload)
pub async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<AnalysisReport>>, AppError> {
    info!("Received analysis request");

    let mut request = AnalysisRequest::default();

    // Process multipart form fields
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                request.file_name = field.file_name().map(str::to_string);
                request.file_bytes = field.bytes().await?.to_vec();
                debug!("Received file part: {} bytes", request.file_bytes.len());
            }
            // Repeated fields accumulate
            "drugs" => request.drugs.push(field.text().await?),
            "patient_id" => {
                let id = field.text().await?;
                request.patient_id = Some(id).filter(|id| !id.trim().is_empty());
            }
            other => debug!("Ignoring unknown form field: {}", other),
        }
    }

    let reports = state.processor().analyze(request).await?;
    info!("Returning {} report(s)", reports.len());

    Ok(Json(reports))
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Resource not found")))
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid analysis request: {0}")]
    Input(#[from] InputError),

    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        warn!("{}", self);

        let (status, body) = match self {
            AppError::Input(e) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_details("Invalid analysis request", e.to_string()),
            ),
            AppError::Multipart(e) => (
                e.status(),
                ErrorResponse::with_details("Malformed multipart body", e.body_text()),
            ),
        };

        (status, Json(body)).into_response()
    }
}
