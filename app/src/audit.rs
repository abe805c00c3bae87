// ==============================================================================
// audit.rs - Audit Logging for Pharmacogenomic Analyses
// ==============================================================================
// Description: Structured audit trail for analysis requests, emitted on the
//              `pgx_audit` tracing target
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-02-09
// Version: 2.0.0
// Compliance: HIPAA § 164.312(b), GDPR Article 30
// ==============================================================================
// Events never carry genotype content: only identifiers, hashes, counts and
// verdict labels.
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Tracing target for audit events
pub const AUDIT_TARGET: &str = "pgx_audit";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Input events
    FileReceived,
    FileValidated,
    FileRejected,

    // Processing events
    AnalysisStarted,
    AnalysisCompleted,
    ParseDegraded,

    // Clinical events
    UnsupportedDrug,
    AmbiguousCall,
    ClinicalAlertRaised,

    // Collaborator events
    ExplanationFallback,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::FileReceived => "file_received",
            AuditEventType::FileValidated => "file_validated",
            AuditEventType::FileRejected => "file_rejected",
            AuditEventType::AnalysisStarted => "analysis_started",
            AuditEventType::AnalysisCompleted => "analysis_completed",
            AuditEventType::ParseDegraded => "parse_degraded",
            AuditEventType::UnsupportedDrug => "unsupported_drug",
            AuditEventType::AmbiguousCall => "ambiguous_call",
            AuditEventType::ClinicalAlertRaised => "clinical_alert_raised",
            AuditEventType::ExplanationFallback => "explanation_fallback",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Analysis request identifier
    pub request_id: Uuid,
    pub patient_id: Option<String>,
    pub resource: Option<String>,
    pub result: String,
    pub details: serde_json::Value,
    pub severity: LogSeverity,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        request_id: Uuid,
        resource: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        let severity = match event_type {
            AuditEventType::ParseDegraded
            | AuditEventType::AmbiguousCall
            | AuditEventType::ExplanationFallback => LogSeverity::Warning,

            AuditEventType::FileRejected => LogSeverity::Error,

            AuditEventType::ClinicalAlertRaised => LogSeverity::Critical,

            _ => LogSeverity::Info,
        };

        let result = match event_type {
            AuditEventType::FileRejected => "rejected",
            AuditEventType::ParseDegraded | AuditEventType::ExplanationFallback => "degraded",
            _ => "success",
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            request_id,
            patient_id: None,
            resource,
            result: result.to_string(),
            details,
            severity,
        }
    }

    pub fn with_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    /// Emit the event on the audit target
    pub fn log(&self) {
        let details = self.details.to_string();
        let patient = self.patient_id.as_deref().unwrap_or("-");
        let resource = self.resource.as_deref().unwrap_or("-");

        match self.severity {
            LogSeverity::Info => info!(
                target: AUDIT_TARGET,
                event_id = %self.id,
                request_id = %self.request_id,
                event_type = self.event_type.as_str(),
                patient_id = patient,
                resource = resource,
                result = %self.result,
                details = %details,
                "audit"
            ),
            LogSeverity::Warning => warn!(
                target: AUDIT_TARGET,
                event_id = %self.id,
                request_id = %self.request_id,
                event_type = self.event_type.as_str(),
                patient_id = patient,
                resource = resource,
                result = %self.result,
                details = %details,
                "audit"
            ),
            LogSeverity::Error | LogSeverity::Critical => error!(
                target: AUDIT_TARGET,
                event_id = %self.id,
                request_id = %self.request_id,
                event_type = self.event_type.as_str(),
                patient_id = patient,
                resource = resource,
                result = %self.result,
                details = %details,
                critical = matches!(self.severity, LogSeverity::Critical),
                "audit"
            ),
        }
    }
}

/// Convenience function to build and emit an audit event
pub fn log_event(
    event_type: AuditEventType,
    request_id: Uuid,
    resource: Option<String>,
    details: serde_json::Value,
) -> AuditEvent {
    let event = AuditEvent::new(event_type, request_id, resource, details);
    event.log();
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_creation() {
        let request_id = Uuid::new_v4();
        let event = AuditEvent::new(
            AuditEventType::FileValidated,
            request_id,
            Some("patient.vcf".to_string()),
            serde_json::json!({
                "size": 5242880,
                "sha256": "abc123"
            }),
        )
        .with_patient("PATIENT_ABC123");

        assert_eq!(event.request_id, request_id);
        assert_eq!(event.resource, Some("patient.vcf".to_string()));
        assert_eq!(event.patient_id.as_deref(), Some("PATIENT_ABC123"));
        assert_eq!(event.severity, LogSeverity::Info);
        assert_eq!(event.result, "success");
    }

    #[test]
    fn test_event_severity_and_result() {
        let rejected = AuditEvent::new(AuditEventType::FileRejected, Uuid::new_v4(), None, serde_json::json!({}));
        assert_eq!(rejected.severity, LogSeverity::Error);
        assert_eq!(rejected.result, "rejected");

        let alert = AuditEvent::new(AuditEventType::ClinicalAlertRaised, Uuid::new_v4(), None, serde_json::json!({}));
        assert_eq!(alert.severity, LogSeverity::Critical);

        let fallback = log_event(AuditEventType::ExplanationFallback, Uuid::new_v4(), None, serde_json::json!({}));
        assert_eq!(fallback.severity, LogSeverity::Warning);
        assert_eq!(fallback.result, "degraded");
    }

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(
            serde_json::to_string(&AuditEventType::ClinicalAlertRaised).unwrap(),
            "\"clinical_alert_raised\""
        );
        assert_eq!(AuditEventType::ParseDegraded.as_str(), "parse_degraded");
    }
}
