// ==============================================================================
// explanation/mod.rs - Clinical Explanation Bridge
// ==============================================================================
// Description: Hands structured drug-risk facts to an external text generator
//              and always returns a usable explanation
// Author: Matt Barham
// Created: 2026-02-05
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================
// Failure policy:
//   each attempt runs under a timeout; failed attempts are retried with a
//   linear back-off up to `max_attempts`; afterwards a template explanation
//   built from the same facts is returned with `is_fallback = true`
// ==============================================================================

pub mod chat_client;

pub use chat_client::{ChatCompletionClient, ExplanationConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cpic::DrugEvaluation;
use crate::models::{DetectedVariant, Phenotype, RiskLabel, Severity};

#[derive(Error, Debug)]
pub enum ExplanationError {
    #[error("Explanation service not configured")]
    NotConfigured,

    #[error("Explanation service timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Explanation service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed explanation response: {0}")]
    Malformed(String),
}

/// Facts the explanation is allowed to use
///
/// Generators must not infer genotype, assign phenotype or change the risk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationFacts {
    pub drug: String,
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gene: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diplotype: Option<String>,
    pub phenotype: Phenotype,
    pub phenotype_description: String,
    pub detected_variants: Vec<DetectedVariant>,
    pub risk_label: RiskLabel,
    pub severity: Severity,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_drug: Option<String>,
}

impl ExplanationFacts {
    pub fn from_evaluation(evaluation: &DrugEvaluation, detected_variants: Vec<DetectedVariant>) -> Self {
        let profile = evaluation.determining_profile();
        let phenotype = profile.map(|p| p.phenotype).unwrap_or(Phenotype::Unknown);

        Self {
            drug: evaluation.drug.clone(),
            supported: evaluation.supported,
            gene: profile.map(|p| p.gene.clone()),
            diplotype: profile.map(|p| p.diplotype.to_string()),
            phenotype,
            phenotype_description: phenotype.description().to_string(),
            detected_variants,
            risk_label: evaluation.risk_assessment.risk_label,
            severity: evaluation.risk_assessment.severity,
            recommendation: evaluation.recommendation.recommendation.clone(),
            alternative_drug: evaluation.recommendation.alternative_drug_suggestion.clone(),
        }
    }
}

/// The four fields every explanation carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredExplanation {
    pub genetic_finding: String,
    pub biological_mechanism: String,
    pub clinical_impact: String,
    pub recommended_action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmExplanation {
    pub summary: String,
    pub structured: StructuredExplanation,
    pub is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl LlmExplanation {
    fn generated(structured: StructuredExplanation) -> Self {
        Self {
            summary: summarize(&structured),
            structured,
            is_fallback: false,
            fallback_reason: None,
        }
    }

    fn fallback(facts: &ExplanationFacts, reason: impl Into<String>) -> Self {
        let structured = template_explanation(facts);
        Self {
            summary: summarize(&structured),
            structured,
            is_fallback: true,
            fallback_reason: Some(reason.into()),
        }
    }
}

/// External explanation generator
#[async_trait]
pub trait ExplanationService: Send + Sync {
    async fn explain(&self, facts: &ExplanationFacts) -> Result<StructuredExplanation, ExplanationError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Timeout, retry and fallback wrapper around an `ExplanationService`
#[derive(Clone)]
pub struct ExplanationBridge {
    service: Option<Arc<dyn ExplanationService>>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl ExplanationBridge {
    pub fn new(service: Arc<dyn ExplanationService>) -> Self {
        Self {
            service: Some(service),
            timeout: Duration::from_secs(30),
            max_attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }

    /// Bridge that always answers with the template explanation
    pub fn disabled() -> Self {
        Self {
            service: None,
            timeout: Duration::from_secs(30),
            max_attempts: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Bridge for a chat-completions endpoint, or a disabled bridge without an API key
    pub fn from_config(config: ExplanationConfig) -> Result<Self, ExplanationError> {
        let timeout = config.timeout;
        let max_attempts = config.max_attempts;

        if !config.is_configured() {
            warn!("No explanation API key configured; template explanations will be used");
            return Ok(Self::disabled());
        }

        let client = ChatCompletionClient::new(config)?;
        Ok(Self::new(Arc::new(client))
            .with_timeout(timeout)
            .with_max_attempts(max_attempts))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    /// Produce an explanation; never fails
    pub async fn explain(&self, facts: &ExplanationFacts) -> LlmExplanation {
        if !facts.supported {
            return LlmExplanation::fallback(facts, "drug is not in the supported panel");
        }

        let Some(service) = &self.service else {
            return LlmExplanation::fallback(facts, ExplanationError::NotConfigured.to_string());
        };

        let mut last_error = ExplanationError::NotConfigured;
        for attempt in 1..=self.max_attempts {
            let outcome = match tokio::time::timeout(self.timeout, service.explain(facts)).await {
                Ok(result) => result,
                Err(_) => Err(ExplanationError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(structured) => {
                    debug!("{} explained {} on attempt {}", service.name(), facts.drug, attempt);
                    return LlmExplanation::generated(structured);
                }
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} for {} failed: {}",
                        service.name(),
                        attempt,
                        self.max_attempts,
                        facts.drug,
                        e
                    );
                    last_error = e;
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        LlmExplanation::fallback(
            facts,
            format!("{} after {} attempt(s)", last_error, self.max_attempts),
        )
    }
}

fn summarize(structured: &StructuredExplanation) -> String {
    [structured.genetic_finding.trim(), structured.clinical_impact.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic explanation built only from the facts
pub fn template_explanation(facts: &ExplanationFacts) -> StructuredExplanation {
    if !facts.supported {
        return StructuredExplanation {
            genetic_finding: format!(
                "{} is not covered by the supported pharmacogenomic panel, so no gene was evaluated.",
                facts.drug
            ),
            biological_mechanism: "No CPIC drug-gene guideline is configured for this drug.".to_string(),
            clinical_impact: "Genetic risk for this drug could not be assessed.".to_string(),
            recommended_action: "Prescribe according to standard clinical practice and consult a pharmacist if pharmacogenomic guidance is needed.".to_string(),
        };
    }

    let gene = facts.gene.as_deref().unwrap_or("the relevant gene");
    let diplotype = facts.diplotype.as_deref().unwrap_or("*1/*1");

    let variants = if facts.detected_variants.is_empty() {
        format!("No actionable {} variants were detected; the {} (wild type) diplotype was assumed", gene, diplotype)
    } else {
        let list: Vec<String> = facts
            .detected_variants
            .iter()
            .map(|v| format!("{} ({} {})", v.rsid, v.gene, v.star))
            .collect();
        format!("Detected {} giving the {} {} diplotype", list.join(", "), gene, diplotype)
    };

    let genetic_finding = format!("{}, consistent with {} status.", variants, facts.phenotype_description);

    let biological_mechanism = match facts.phenotype {
        Phenotype::Poor => format!("{} enzyme activity is absent or severely reduced, altering how {} is processed.", gene, facts.drug),
        Phenotype::Intermediate => format!("{} activity is reduced, so {} is processed more slowly than usual.", gene, facts.drug),
        Phenotype::Normal => format!("{} activity is typical, so {} is processed as expected.", gene, facts.drug),
        Phenotype::Rapid | Phenotype::Ultrarapid => format!("{} activity is increased, so {} is processed faster than usual.", gene, facts.drug),
        Phenotype::Unknown => format!("The functional effect of the {} result on {} could not be determined.", gene, facts.drug),
    };

    let clinical_impact = match facts.risk_label {
        RiskLabel::Safe => format!("{} is expected to work as intended at standard doses.", facts.drug),
        RiskLabel::AdjustDosage => format!("Standard {} dosing may be inappropriate; the dose likely needs adjustment.", facts.drug),
        RiskLabel::Toxic => format!("Standard {} dosing carries a risk of serious adverse reactions.", facts.drug),
        RiskLabel::Ineffective => format!("{} may not provide the intended therapeutic effect.", facts.drug),
        RiskLabel::Unknown => format!("The genetic impact on {} therapy could not be classified.", facts.drug),
    };

    let recommended_action = match &facts.alternative_drug {
        Some(alternative) => format!("{}. {}.", facts.recommendation, alternative),
        None => format!("{}.", facts.recommendation),
    };

    StructuredExplanation {
        genetic_finding,
        biological_mechanism,
        clinical_impact,
        recommended_action,
    }
}
