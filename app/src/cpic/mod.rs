// ==============================================================================
// cpic/mod.rs - CPIC Rule Engine
// ==============================================================================
// Description: Turns per-gene phenotypes into a drug risk verdict with
//              severity, confidence, recommendation and a decision trace
// Author: Matt Barham
// Created: 2026-02-04
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================
// References:
// - CPIC Guidelines: https://cpicpgx.org/guidelines/
// - CPIC Levels: https://cpicpgx.org/levels/
// ==============================================================================

pub mod comparison;

pub use comparison::{compare_drugs, DrugComparisonSummary, RankedDrug};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::knowledge_base::{CpicRule, DrugGene, KnowledgeBase};
use crate::models::{GeneProfile, Phenotype, RecommendationStrength, RiskLabel, Severity};

/// How the dominating gene is chosen for multi-gene drugs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedencePolicy {
    /// Highest severity wins; ties go to the lower gene rank
    #[default]
    MostSevere,
    /// The primary gene decides unless it has no applicable rule
    PrimaryGene,
}

impl PrecedencePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecedencePolicy::MostSevere => "most_severe",
            PrecedencePolicy::PrimaryGene => "primary_gene",
        }
    }
}

impl FromStr for PrecedencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "most_severe" => Ok(PrecedencePolicy::MostSevere),
            "primary_gene" => Ok(PrecedencePolicy::PrimaryGene),
            other => Err(format!(
                "unknown precedence policy '{}' (expected most_severe or primary_gene)",
                other
            )),
        }
    }
}

impl fmt::Display for PrecedencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence scoring weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidencePolicy {
    pub base: f64,
    /// Added when the deciding phenotype is NM and the label Safe
    pub normal_safe_bonus: f64,
    /// Added when every gene governing the drug was found in the file
    pub all_genes_bonus: f64,
    /// Multiplied by the fraction of genes found
    pub completeness_weight: f64,
    pub max_score: f64,
    pub ambiguous_call_factor: f64,
    pub parse_failure_factor: f64,
    /// Ceiling applied when no rule could be applied
    pub unknown_label_cap: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            base: 0.85,
            normal_safe_bonus: 0.10,
            all_genes_bonus: 0.05,
            completeness_weight: 0.05,
            max_score: 0.99,
            ambiguous_call_factor: 0.8,
            parse_failure_factor: 0.5,
            unknown_label_cap: 0.30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub risk_label: RiskLabel,
    pub confidence_score: f64,
    pub severity: Severity,
    pub confidence_basis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalRecommendation {
    pub guideline: String,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_drug_suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation_strength: Option<RecommendationStrength>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertLevel {
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalAlert {
    pub message: String,
    pub alert_level: AlertLevel,
    pub action_required: bool,
}

impl ClinicalAlert {
    /// Alert for high and critical findings, `None` otherwise
    pub fn for_finding(drug: &str, label: RiskLabel, severity: Severity, basis: &str) -> Option<Self> {
        let alert_level = match severity {
            Severity::Critical => AlertLevel::Critical,
            Severity::High => AlertLevel::High,
            _ => return None,
        };

        let message = match alert_level {
            AlertLevel::Critical => format!(
                "{} risk for {} ({}): do not prescribe without physician review; consider the suggested alternative.",
                label, drug, basis
            ),
            AlertLevel::High => format!(
                "{} risk for {} ({}): physician consultation strongly recommended before prescribing.",
                label, drug, basis
            ),
        };

        Some(Self {
            message,
            alert_level,
            action_required: true,
        })
    }
}

/// Complete rule-engine output for one drug
#[derive(Debug, Clone)]
pub struct DrugEvaluation {
    /// Upper-cased drug name
    pub drug: String,
    pub supported: bool,
    pub pathway: Option<String>,
    pub risk_assessment: RiskAssessment,
    pub recommendation: ClinicalRecommendation,
    /// Gene whose outcome decided the verdict (primary gene when none applied)
    pub determining_gene: Option<String>,
    /// Profiles of the drug's genes as this drug sees them, in rank order
    pub gene_profiles: Vec<GeneProfile>,
    /// Rule identifier (DRUG/GENE/PHENOTYPE) when one fired
    pub fired_rule: Option<String>,
    pub decision_path: String,
    pub clinical_alert: Option<ClinicalAlert>,
}

impl DrugEvaluation {
    pub fn determining_profile(&self) -> Option<&GeneProfile> {
        let gene = self.determining_gene.as_deref()?;
        self.gene_profiles.iter().find(|p| p.gene == gene)
    }
}

/// Per-gene rule lookup result
struct GeneOutcome<'k> {
    association: &'k DrugGene,
    profile: GeneProfile,
    rule: Option<&'k CpicRule>,
    /// Gene requires explicit evidence and none was present
    evidence_missing: bool,
}

/// CPIC rule engine
///
/// Holds no mutable state; evaluating the same inputs twice gives the same
/// verdict.
pub struct RuleEngine<'k> {
    kb: &'k KnowledgeBase,
    precedence: PrecedencePolicy,
    confidence: ConfidencePolicy,
}

impl<'k> RuleEngine<'k> {
    pub fn new(kb: &'k KnowledgeBase) -> Self {
        Self {
            kb,
            precedence: PrecedencePolicy::default(),
            confidence: ConfidencePolicy::default(),
        }
    }

    pub fn with_precedence(mut self, precedence: PrecedencePolicy) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_confidence_policy(mut self, confidence: ConfidencePolicy) -> Self {
        self.confidence = confidence;
        self
    }

    /// Evaluate one drug against the request's gene profiles
    ///
    /// Unsupported drugs produce an `Unknown` verdict; this never fails.
    pub fn evaluate(&self, drug: &str, profiles: &[GeneProfile], parse_success: bool) -> DrugEvaluation {
        let drug = drug.trim().to_ascii_uppercase();
        let Some(definition) = self.kb.drug(&drug) else {
            return self.unsupported(drug);
        };

        let outcomes: Vec<GeneOutcome<'k>> = self
            .kb
            .genes_for(&drug)
            .iter()
            .map(|association| {
                let mut profile = profiles
                    .iter()
                    .find(|p| p.gene == association.gene)
                    .cloned()
                    .unwrap_or_else(|| GeneProfile::not_detected(association.gene.clone()));

                let evidence_missing = association.requires_evidence && !profile.gene_found;
                if evidence_missing {
                    profile.phenotype = Phenotype::Unknown;
                }

                let rule = if profile.phenotype.is_known() {
                    self.kb.rule(&drug, &association.gene, profile.phenotype)
                } else {
                    None
                };

                GeneOutcome {
                    association,
                    profile,
                    rule,
                    evidence_missing,
                }
            })
            .collect();

        let Some(primary) = outcomes.first() else {
            return self.unsupported(drug);
        };
        let decided = self.select(&outcomes);
        let deciding = decided.unwrap_or(primary);

        let (label, severity, recommendation_text, strength) = match decided.and_then(|o| o.rule) {
            Some(rule) => (
                rule.risk_label,
                rule.severity(),
                rule.recommendation.clone(),
                Some(rule.strength),
            ),
            _ => (
                RiskLabel::Unknown,
                RiskLabel::Unknown.default_severity(),
                format!(
                    "Insufficient evidence to make a genotype-guided recommendation for {}; follow standard clinical practice",
                    drug
                ),
                None,
            ),
        };

        let (confidence_score, confidence_basis) = self.score(&outcomes, deciding, label, parse_success);

        let alternative_drug_suggestion = match label {
            RiskLabel::Toxic | RiskLabel::Ineffective => definition.alternative.clone(),
            _ => None,
        };

        let basis = format!(
            "{} {} {}",
            deciding.profile.gene, deciding.profile.diplotype, deciding.profile.phenotype
        );
        let clinical_alert = ClinicalAlert::for_finding(&drug, label, severity, &basis);

        let fired_rule = decided.and_then(|o| o.rule).map(CpicRule::rule_id);
        let decision_path = self.trace(&drug, &outcomes, decided, label, severity, &recommendation_text);
        let determining_gene = Some(deciding.profile.gene.clone());

        debug!(
            "{}: {} ({}) via {}, confidence {:.2}",
            drug,
            label,
            severity,
            fired_rule.as_deref().unwrap_or("no rule"),
            confidence_score
        );

        DrugEvaluation {
            drug: drug.clone(),
            supported: true,
            pathway: Some(definition.pathway.clone()),
            risk_assessment: RiskAssessment {
                risk_label: label,
                confidence_score,
                severity,
                confidence_basis,
            },
            recommendation: ClinicalRecommendation {
                guideline: definition.guideline.clone(),
                recommendation: recommendation_text,
                alternative_drug_suggestion,
                evidence_level: Some(definition.evidence_level.clone()),
                recommendation_strength: strength,
            },
            determining_gene,
            gene_profiles: outcomes.into_iter().map(|o| o.profile).collect(),
            fired_rule,
            decision_path,
            clinical_alert,
        }
    }

    /// Pick the dominating gene among outcomes with an applicable rule
    fn select<'o>(&self, outcomes: &'o [GeneOutcome<'k>]) -> Option<&'o GeneOutcome<'k>> {
        let mut actionable = outcomes.iter().filter(|o| o.rule.is_some());

        match self.precedence {
            PrecedencePolicy::PrimaryGene => actionable.next(),
            PrecedencePolicy::MostSevere => {
                // Outcomes are in rank order, so strict comparison keeps the lower rank on ties
                let mut best: Option<&GeneOutcome<'k>> = None;
                for outcome in actionable {
                    let severity = outcome.rule.map(CpicRule::severity);
                    if best.map_or(true, |b| severity > b.rule.map(CpicRule::severity)) {
                        best = Some(outcome);
                    }
                }
                best
            }
        }
    }

    fn score(
        &self,
        outcomes: &[GeneOutcome<'k>],
        deciding: &GeneOutcome<'k>,
        label: RiskLabel,
        parse_success: bool,
    ) -> (f64, String) {
        let policy = &self.confidence;
        let total = outcomes.len();
        let found = outcomes.iter().filter(|o| o.profile.gene_found).count();
        let all_found = found == total;
        let completeness = if total > 0 { found as f64 / total as f64 } else { 0.0 };

        let mut factors = vec![format!("base {:.2}", policy.base)];
        let mut score = policy.base;

        if deciding.profile.phenotype == Phenotype::Normal && label == RiskLabel::Safe {
            score += policy.normal_safe_bonus;
            factors.push(format!("NM with Safe label +{:.2}", policy.normal_safe_bonus));
        }
        if all_found {
            score += policy.all_genes_bonus;
            factors.push(format!("all genes detected +{:.2}", policy.all_genes_bonus));
        }
        score += completeness * policy.completeness_weight;
        factors.push(format!(
            "completeness {}/{} +{:.3}",
            found,
            total,
            completeness * policy.completeness_weight
        ));
        score = score.min(policy.max_score);

        if outcomes.iter().any(|o| o.profile.ambiguous_call) {
            score *= policy.ambiguous_call_factor;
            factors.push(format!("ambiguous star-allele call x{}", policy.ambiguous_call_factor));
        }
        if !parse_success {
            score *= policy.parse_failure_factor;
            factors.push(format!("VCF parsing failed x{}", policy.parse_failure_factor));
        }
        if label == RiskLabel::Unknown && score > policy.unknown_label_cap {
            score = policy.unknown_label_cap;
            factors.push(format!("capped at {:.2} without an applicable rule", policy.unknown_label_cap));
        }

        let score = (score * 100.0).round() / 100.0;
        let basis = format!(
            "Confidence based on phenotype ({}), risk ({}), data completeness ({:.1}%) and gene availability ({}): {}",
            deciding.profile.phenotype,
            label,
            completeness * 100.0,
            if all_found { "full" } else { "partial" },
            factors.join("; ")
        );

        (score, basis)
    }

    fn trace(
        &self,
        drug: &str,
        outcomes: &[GeneOutcome<'k>],
        decided: Option<&GeneOutcome<'k>>,
        label: RiskLabel,
        severity: Severity,
        recommendation: &str,
    ) -> String {
        let genes: Vec<&str> = outcomes.iter().map(|o| o.association.gene.as_str()).collect();
        let mut steps = vec![format!("{} is governed by {}", drug, genes.join(", "))];

        for outcome in outcomes {
            let profile = &outcome.profile;
            let input = if outcome.evidence_missing {
                format!(
                    "{}: no variants in file and explicit evidence required -> {}",
                    profile.gene, profile.phenotype
                )
            } else if !profile.gene_found {
                format!(
                    "{}: no variants in file, wild type assumed {} -> {}",
                    profile.gene, profile.diplotype, profile.phenotype
                )
            } else if profile.ambiguous_call {
                format!(
                    "{}: ambiguous call from [{}], kept {} -> {}",
                    profile.gene,
                    profile.reported_alleles.join(", "),
                    profile.diplotype,
                    profile.phenotype
                )
            } else {
                format!("{}: {} -> {}", profile.gene, profile.diplotype, profile.phenotype)
            };
            steps.push(input);
        }

        match decided {
            Some(outcome) => {
                if outcomes.len() > 1 {
                    steps.push(format!(
                        "precedence {} selects {}",
                        self.precedence, outcome.association.gene
                    ));
                }
                if let Some(rule) = outcome.rule {
                    steps.push(format!("rule {} fired", rule.rule_id()));
                }
            }
            None => steps.push("no rule applies to the called phenotype(s)".to_string()),
        }

        steps.push(format!("risk {} (severity {}) -> {}", label, severity, recommendation));
        steps.join(" | ")
    }

    fn unsupported(&self, drug: String) -> DrugEvaluation {
        let panel = self.kb.supported_drugs().join(", ");
        debug!("{} is not in the supported panel", drug);

        DrugEvaluation {
            risk_assessment: RiskAssessment {
                risk_label: RiskLabel::Unknown,
                confidence_score: 0.0,
                severity: Severity::None,
                confidence_basis: format!("{} is not in the supported drug panel; no rule evaluated", drug),
            },
            recommendation: ClinicalRecommendation {
                guideline: "N/A".to_string(),
                recommendation: format!(
                    "{} is not in the supported pharmacogenomic panel. Supported drugs: {}",
                    drug, panel
                ),
                alternative_drug_suggestion: None,
                evidence_level: None,
                recommendation_strength: None,
            },
            decision_path: format!("{} is not in the supported panel | no rule evaluated | risk Unknown", drug),
            drug,
            supported: false,
            pathway: None,
            determining_gene: None,
            gene_profiles: Vec::new(),
            fired_rule: None,
            clinical_alert: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Diplotype;

    fn profile(gene: &str, a: &str, b: &str, phenotype: Phenotype) -> GeneProfile {
        GeneProfile {
            diplotype: Diplotype::new(a, b),
            phenotype,
            gene_found: true,
            ..GeneProfile::not_detected(gene)
        }
    }

    #[test]
    fn test_warfarin_intermediate_metabolizer() {
        let kb = KnowledgeBase::embedded().unwrap();
        let profiles = vec![profile("CYP2C9", "*2", "*3", Phenotype::Intermediate)];

        let eval = RuleEngine::new(&kb).evaluate("warfarin", &profiles, true);

        assert_eq!(eval.drug, "WARFARIN");
        assert_eq!(eval.risk_assessment.risk_label, RiskLabel::AdjustDosage);
        assert_eq!(eval.risk_assessment.severity, Severity::Moderate);
        assert_eq!(eval.determining_gene.as_deref(), Some("CYP2C9"));
        assert_eq!(eval.fired_rule.as_deref(), Some("WARFARIN/CYP2C9/IM"));
        assert!(eval.clinical_alert.is_none());
        assert!(eval.recommendation.alternative_drug_suggestion.is_none());
        // VKORC1 absent and requires evidence
        assert_eq!(eval.gene_profiles[1].phenotype, Phenotype::Unknown);
        assert!(eval.decision_path.contains("WARFARIN/CYP2C9/IM"));
        assert!(eval.decision_path.contains("explicit evidence required"));
        // 0.85 + completeness 1/2 * 0.05
        assert!((eval.risk_assessment.confidence_score - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_most_severe_gene_dominates() {
        let kb = KnowledgeBase::embedded().unwrap();
        let profiles = vec![
            profile("TPMT", "*1", "*1", Phenotype::Normal),
            profile("NUDT15", "*3", "*3", Phenotype::Poor),
        ];

        let eval = RuleEngine::new(&kb).evaluate("AZATHIOPRINE", &profiles, true);
        assert_eq!(eval.risk_assessment.risk_label, RiskLabel::Toxic);
        assert_eq!(eval.determining_gene.as_deref(), Some("NUDT15"));
        assert_eq!(eval.clinical_alert.as_ref().map(|a| a.alert_level), Some(AlertLevel::Critical));
        assert!(eval.recommendation.alternative_drug_suggestion.is_some());

        let eval = RuleEngine::new(&kb)
            .with_precedence(PrecedencePolicy::PrimaryGene)
            .evaluate("AZATHIOPRINE", &profiles, true);
        assert_eq!(eval.risk_assessment.risk_label, RiskLabel::Safe);
        assert_eq!(eval.determining_gene.as_deref(), Some("TPMT"));
    }

    #[test]
    fn test_severity_tie_goes_to_primary_gene() {
        let kb = KnowledgeBase::embedded().unwrap();
        let profiles = vec![
            profile("TPMT", "*1", "*3A", Phenotype::Intermediate),
            profile("NUDT15", "*1", "*3", Phenotype::Intermediate),
        ];

        let eval = RuleEngine::new(&kb).evaluate("MERCAPTOPURINE", &profiles, true);
        assert_eq!(eval.determining_gene.as_deref(), Some("TPMT"));
    }

    #[test]
    fn test_unsupported_drug() {
        let kb = KnowledgeBase::embedded().unwrap();
        let eval = RuleEngine::new(&kb).evaluate("aspirin", &[], true);

        assert!(!eval.supported);
        assert_eq!(eval.risk_assessment.risk_label, RiskLabel::Unknown);
        assert_eq!(eval.risk_assessment.confidence_score, 0.0);
        assert_eq!(eval.risk_assessment.severity, Severity::None);
        assert!(eval.recommendation.recommendation.contains("WARFARIN"));
        assert!(eval.clinical_alert.is_none());
    }

    #[test]
    fn test_no_rule_for_phenotype_is_unknown() {
        let kb = KnowledgeBase::embedded().unwrap();
        // No PHENYTOIN rule exists for RM
        let profiles = vec![profile("CYP2C9", "*1", "*1", Phenotype::Rapid)];

        let eval = RuleEngine::new(&kb).evaluate("PHENYTOIN", &profiles, true);
        assert_eq!(eval.risk_assessment.risk_label, RiskLabel::Unknown);
        assert_eq!(eval.risk_assessment.severity, Severity::Low);
        assert!((eval.risk_assessment.confidence_score - 0.30).abs() < 1e-9);
        assert!(eval.fired_rule.is_none());
    }

    #[test]
    fn test_confidence_penalties() {
        let kb = KnowledgeBase::embedded().unwrap();
        let mut ambiguous = profile("CYP2D6", "*1", "*1", Phenotype::Normal);
        ambiguous.ambiguous_call = true;

        let clean = RuleEngine::new(&kb).evaluate("CODEINE", &[profile("CYP2D6", "*1", "*1", Phenotype::Normal)], true);
        let penalised = RuleEngine::new(&kb).evaluate("CODEINE", &[ambiguous], true);

        assert!((clean.risk_assessment.confidence_score - 0.99).abs() < 1e-9);
        assert!(penalised.risk_assessment.confidence_score < clean.risk_assessment.confidence_score);
        assert!(penalised.risk_assessment.confidence_basis.contains("ambiguous"));
    }

    #[test]
    fn test_codeine_ultrarapid_alert() {
        let kb = KnowledgeBase::embedded().unwrap();
        let eval = RuleEngine::new(&kb).evaluate(
            "CODEINE",
            &[profile("CYP2D6", "*1", "*1xN", Phenotype::Ultrarapid)],
            true,
        );

        let alert = eval.clinical_alert.unwrap();
        assert_eq!(alert.alert_level, AlertLevel::Critical);
        assert!(alert.action_required);
        assert!(eval.recommendation.alternative_drug_suggestion.is_some());
    }

    #[test]
    fn test_precedence_policy_parse() {
        assert_eq!("most-severe".parse::<PrecedencePolicy>().unwrap(), PrecedencePolicy::MostSevere);
        assert_eq!("PRIMARY_GENE".parse::<PrecedencePolicy>().unwrap(), PrecedencePolicy::PrimaryGene);
        assert!("loudest".parse::<PrecedencePolicy>().is_err());
    }
}
