// ==============================================================================
// report.rs - Per-Drug Analysis Report
// ==============================================================================
// Description: Fixed report schema returned to callers and its assembly from
//              rule-engine, explanation and quality outputs
// Author: Matt Barham
// Created: 2026-02-05
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cpic::{ClinicalAlert, ClinicalRecommendation, DrugComparisonSummary, DrugEvaluation, RiskAssessment};
use crate::explanation::LlmExplanation;
use crate::models::{DetectedVariant, GeneProfile, Phenotype};
use crate::quality::QualityMetrics;

/// Diplotype shown for drugs outside the panel
const NOT_APPLICABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PharmacogenomicProfile {
    /// Genes governing the drug, primary gene first
    pub genes: Vec<String>,
    /// Diplotype of the determining gene
    pub diplotype: String,
    /// Phenotype of the determining gene
    pub phenotype: Phenotype,
    pub detected_variants: Vec<DetectedVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub determining_gene: Option<String>,
    pub gene_profiles: Vec<GeneProfile>,
}

/// One drug's report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub patient_id: String,
    pub drug: String,
    pub timestamp: DateTime<Utc>,
    pub risk_assessment: RiskAssessment,
    pub pharmacogenomic_profile: PharmacogenomicProfile,
    pub clinical_recommendation: ClinicalRecommendation,
    pub llm_generated_explanation: LlmExplanation,
    pub decision_path_explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_alert: Option<ClinicalAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drug_comparison_summary: Option<DrugComparisonSummary>,
    pub quality_metrics: QualityMetrics,
}

/// Values shared by every report of one request
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub patient_id: String,
    pub timestamp: DateTime<Utc>,
    pub quality: QualityMetrics,
}

impl ReportContext {
    pub fn new(patient_id: String, quality: QualityMetrics) -> Self {
        Self {
            patient_id,
            timestamp: Utc::now(),
            quality,
        }
    }

    /// Compose the report for one evaluated drug
    pub fn assemble(
        &self,
        evaluation: DrugEvaluation,
        detected_variants: Vec<DetectedVariant>,
        explanation: LlmExplanation,
        comparison: Option<DrugComparisonSummary>,
    ) -> AnalysisReport {
        let (diplotype, phenotype) = match evaluation.determining_profile() {
            Some(profile) => (profile.diplotype.to_string(), profile.phenotype),
            None => (NOT_APPLICABLE.to_string(), Phenotype::Unknown),
        };

        AnalysisReport {
            patient_id: self.patient_id.clone(),
            drug: evaluation.drug,
            timestamp: self.timestamp,
            risk_assessment: evaluation.risk_assessment,
            pharmacogenomic_profile: PharmacogenomicProfile {
                genes: evaluation.gene_profiles.iter().map(|p| p.gene.clone()).collect(),
                diplotype,
                phenotype,
                detected_variants,
                determining_gene: evaluation.determining_gene,
                gene_profiles: evaluation.gene_profiles,
            },
            clinical_recommendation: evaluation.recommendation,
            llm_generated_explanation: explanation,
            decision_path_explanation: evaluation.decision_path,
            clinical_alert: evaluation.clinical_alert,
            drug_comparison_summary: comparison,
            quality_metrics: self.quality.clone(),
        }
    }
}

/// Caller-supplied identifier, else the first VCF sample, else a generated one
pub fn resolve_patient_id(requested: Option<&str>, sample_names: &[String]) -> String {
    requested
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| sample_names.first().cloned())
        .unwrap_or_else(generate_patient_id)
}

/// PATIENT_ followed by six upper-case hex digits
pub fn generate_patient_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("PATIENT_{}", hex[..6].to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_patient_id_format() {
        let id = generate_patient_id();
        assert_eq!(id.len(), "PATIENT_".len() + 6);
        assert!(id.starts_with("PATIENT_"));
        assert!(id[8..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_patient_id_precedence() {
        let samples = vec!["NA12878".to_string()];

        assert_eq!(resolve_patient_id(Some("P-42"), &samples), "P-42");
        assert_eq!(resolve_patient_id(Some("  "), &samples), "NA12878");
        assert_eq!(resolve_patient_id(None, &samples), "NA12878");
        assert!(resolve_patient_id(None, &[]).starts_with("PATIENT_"));
    }
}
