// ==============================================================================
// processor.rs - Pharmacogenomic Analysis Pipeline
// ==============================================================================
// Description: Single-pass request orchestration: validate, parse, resolve
//              diplotypes, call phenotypes, evaluate drugs, explain, assemble
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-02-09
// Version: 3.0.0
// ==============================================================================
// Data flows strictly forward:
//   bytes -> VariantRecord[] -> GeneProfile[] -> DrugEvaluation[]
//         -> LlmExplanation[] (concurrent) -> AnalysisReport[]
// ==============================================================================

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::allele_resolver::GeneAlleleResolver;
use crate::audit::{self, AuditEventType};
use crate::cpic::{compare_drugs, ConfidencePolicy, DrugEvaluation, PrecedencePolicy, RuleEngine};
use crate::explanation::{ExplanationBridge, ExplanationFacts};
use crate::knowledge_base::KnowledgeBase;
use crate::models::DetectedVariant;
use crate::parsers::VcfParser;
use crate::phenotype::PhenotypeCaller;
use crate::quality::QualityMetrics;
use crate::report::{resolve_patient_id, AnalysisReport, ReportContext};
use crate::validator::{InputError, InputValidator};

/// One analysis request
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    /// Declared filename of the upload
    pub file_name: Option<String>,
    pub file_bytes: Vec<u8>,
    /// Raw drug entries; comma-separated entries are split
    pub drugs: Vec<String>,
    pub patient_id: Option<String>,
}

/// Pharmacogenomic analysis pipeline
///
/// Stateless between requests; safe to share behind an `Arc`.
pub struct PgxProcessor {
    kb: Arc<KnowledgeBase>,
    validator: InputValidator,
    parser: VcfParser,
    bridge: ExplanationBridge,
    precedence: PrecedencePolicy,
    confidence: ConfidencePolicy,
}

impl PgxProcessor {
    pub fn new(kb: Arc<KnowledgeBase>, bridge: ExplanationBridge) -> Self {
        Self {
            kb,
            validator: InputValidator::new(),
            parser: VcfParser::new(),
            bridge,
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

    pub fn with_validator(mut self, validator: InputValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn precedence(&self) -> PrecedencePolicy {
        self.precedence
    }

    pub fn explanations_enabled(&self) -> bool {
        self.bridge.is_enabled()
    }

    /// Run the full pipeline for one request
    ///
    /// Only input errors are fatal; every other problem degrades inside the
    /// returned reports. Reports follow the de-duplicated drug order: rules
    /// are evaluated synchronously in that order, and only the explanation
    /// calls run concurrently (`join_all` returns them in input order).
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<Vec<AnalysisReport>, InputError> {
        let request_id = Uuid::new_v4();
        let kb: &KnowledgeBase = &self.kb;

        audit::log_event(
            AuditEventType::FileReceived,
            request_id,
            request.file_name.clone(),
            serde_json::json!({
                "size": request.file_bytes.len(),
                "drug_entries": request.drugs.len(),
            }),
        );

        // 1. Validate (size cap first)
        let validated = match self
            .validator
            .validate(request.file_name.as_deref(), &request.file_bytes, &request.drugs)
        {
            Ok(validated) => validated,
            Err(e) => {
                audit::log_event(
                    AuditEventType::FileRejected,
                    request_id,
                    request.file_name.clone(),
                    serde_json::json!({ "reason": e.to_string() }),
                );
                return Err(e);
            }
        };

        audit::log_event(
            AuditEventType::FileValidated,
            request_id,
            Some(validated.safe_name.clone()),
            serde_json::json!({
                "size": validated.size,
                "sha256": validated.hash_sha256,
                "compressed": validated.compressed,
            }),
        );

        // 2. Parse once
        let mut parsed = self.parser.parse_bytes(&validated.document);
        let mut warnings = validated.warnings.clone();
        warnings.append(&mut parsed.warnings);
        parsed.warnings = warnings;
        let parse_success = parsed.parse_success();
        let input_size = validated.size;
        let drugs = validated.drugs.clone();
        drop(validated);

        if !parse_success {
            audit::log_event(
                AuditEventType::ParseDegraded,
                request_id,
                None,
                serde_json::json!({
                    "data_lines": parsed.data_lines,
                    "skipped_lines": parsed.skipped_lines,
                }),
            );
        }

        // 3. Diplotypes and phenotypes for every gene the supported drugs need
        let genes = relevant_genes(kb, &drugs);
        let resolver = GeneAlleleResolver::new(kb);
        let profiles = PhenotypeCaller::new(kb).call_profiles(resolver.resolve(&parsed.records, &genes));

        for profile in profiles.iter().filter(|p| p.ambiguous_call) {
            audit::log_event(
                AuditEventType::AmbiguousCall,
                request_id,
                Some(profile.gene.clone()),
                serde_json::json!({
                    "reported_alleles": profile.reported_alleles,
                    "kept": profile.diplotype.to_string(),
                }),
            );
        }

        let quality = QualityMetrics::compute(&parsed, &profiles, input_size);
        let patient_id = resolve_patient_id(request.patient_id.as_deref(), &parsed.sample_names);

        audit::log_event(
            AuditEventType::AnalysisStarted,
            request_id,
            None,
            serde_json::json!({
                "drugs": drugs,
                "genes": genes,
                "records": parsed.records.len(),
            }),
        );

        // 4. Rule evaluation: pure and synchronous, one drug at a time in input order
        let engine = RuleEngine::new(kb)
            .with_precedence(self.precedence)
            .with_confidence_policy(self.confidence);
        let evaluations: Vec<DrugEvaluation> = drugs
            .iter()
            .map(|drug| engine.evaluate(drug, &profiles, parse_success))
            .collect();

        let comparisons = compare_drugs(kb, &evaluations);
        let detected: Vec<Vec<DetectedVariant>> = evaluations
            .iter()
            .map(|e| e.gene_profiles.iter().flat_map(|p| resolver.detected_variants(p)).collect())
            .collect();

        // 5. Explanations, concurrently; join_all keeps input order
        let facts: Vec<ExplanationFacts> = evaluations
            .iter()
            .zip(&detected)
            .map(|(e, d)| ExplanationFacts::from_evaluation(e, d.clone()))
            .collect();
        let explanations = join_all(facts.iter().map(|f| self.bridge.explain(f))).await;

        // 6. Assemble
        let context = ReportContext::new(patient_id.clone(), quality);
        let reports: Vec<AnalysisReport> = evaluations
            .into_iter()
            .zip(detected)
            .zip(explanations)
            .zip(comparisons)
            .map(|(((evaluation, detected), explanation), comparison)| {
                self.audit_report(request_id, &patient_id, &evaluation, explanation.fallback_reason.as_deref());
                context.assemble(evaluation, detected, explanation, comparison)
            })
            .collect();

        audit::AuditEvent::new(
            AuditEventType::AnalysisCompleted,
            request_id,
            None,
            serde_json::json!({
                "reports": reports.len(),
                "vcf_parsing_success": parse_success,
                "alerts": reports.iter().filter(|r| r.clinical_alert.is_some()).count(),
            }),
        )
        .with_patient(patient_id)
        .log();

        info!(
            "Analysis {} complete: {} report(s), {} record(s) parsed",
            request_id,
            reports.len(),
            parsed.records.len()
        );

        Ok(reports)
    }

    fn audit_report(&self, request_id: Uuid, patient_id: &str, evaluation: &DrugEvaluation, fallback_reason: Option<&str>) {
        if !evaluation.supported {
            audit::AuditEvent::new(
                AuditEventType::UnsupportedDrug,
                request_id,
                Some(evaluation.drug.clone()),
                serde_json::json!({}),
            )
            .with_patient(patient_id)
            .log();
            return;
        }

        if let Some(alert) = &evaluation.clinical_alert {
            audit::AuditEvent::new(
                AuditEventType::ClinicalAlertRaised,
                request_id,
                Some(evaluation.drug.clone()),
                serde_json::json!({
                    "risk_label": evaluation.risk_assessment.risk_label,
                    "severity": evaluation.risk_assessment.severity,
                    "alert_level": alert.alert_level,
                    "rule": evaluation.fired_rule,
                }),
            )
            .with_patient(patient_id)
            .log();
        }

        if let Some(reason) = fallback_reason {
            if self.bridge.is_enabled() {
                audit::AuditEvent::new(
                    AuditEventType::ExplanationFallback,
                    request_id,
                    Some(evaluation.drug.clone()),
                    serde_json::json!({ "reason": reason }),
                )
                .log();
            }
        }
    }
}

/// Genes needed by the supported drugs, in drug order then gene rank
fn relevant_genes(kb: &KnowledgeBase, drugs: &[String]) -> Vec<String> {
    let mut genes: Vec<String> = Vec::new();
    for drug in drugs {
        for association in kb.genes_for(drug) {
            if !genes.contains(&association.gene) {
                genes.push(association.gene.clone());
            }
        }
    }
    debug!("Relevant genes: {:?}", genes);
    genes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explanation::{ExplanationError, ExplanationService, StructuredExplanation};
    use crate::cpic::AlertLevel;
    use crate::models::{Phenotype, RiskLabel, Severity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WARFARIN_VCF: &str = "##fileformat=VCFv4.2\n\
##source=pgx-test\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA12878\n\
10\t94942290\trs1799853\tC\tT\t.\tPASS\tGENE=CYP2C9;STAR=*2;RS=1799853\tGT\t0/1\n\
10\t94981296\trs1057910\tA\tC\t.\tPASS\tGENE=CYP2C9;STAR=*3;RS=1057910\tGT\t0/1\n\
22\t42130692\trs3892097\tG\tA\t.\tPASS\tGENE=CYP2D6;STAR=*4\tGT\t1/1\n";

    /// Counts calls and fails every one of them
    struct UnreachableService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExplanationService for UnreachableService {
        async fn explain(&self, _facts: &ExplanationFacts) -> Result<StructuredExplanation, ExplanationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExplanationError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    /// Echoes the facts it was given
    struct EchoService;

    #[async_trait]
    impl ExplanationService for EchoService {
        async fn explain(&self, facts: &ExplanationFacts) -> Result<StructuredExplanation, ExplanationError> {
            Ok(StructuredExplanation {
                genetic_finding: format!("{} {}", facts.drug, facts.diplotype.clone().unwrap_or_default()),
                biological_mechanism: "mechanism".to_string(),
                clinical_impact: facts.risk_label.to_string(),
                recommended_action: facts.recommendation.clone(),
            })
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn processor() -> PgxProcessor {
        let kb = Arc::new(KnowledgeBase::embedded().unwrap());
        PgxProcessor::new(kb, ExplanationBridge::new(Arc::new(EchoService)))
    }

    fn request(vcf: &str, drugs: &[&str]) -> AnalysisRequest {
        AnalysisRequest {
            file_name: Some("patient.vcf".to_string()),
            file_bytes: vcf.as_bytes().to_vec(),
            drugs: drugs.iter().map(|d| d.to_string()).collect(),
            patient_id: None,
        }
    }

    #[tokio::test]
    async fn test_warfarin_cyp2c9_star2_star3() {
        let reports = processor().analyze(request(WARFARIN_VCF, &["warfarin"])).await.unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.drug, "WARFARIN");
        assert_eq!(report.patient_id, "NA12878");
        assert_eq!(report.pharmacogenomic_profile.diplotype, "*2/*3");
        assert_eq!(report.pharmacogenomic_profile.phenotype, Phenotype::Intermediate);
        assert_eq!(report.risk_assessment.risk_label, RiskLabel::AdjustDosage);
        assert_eq!(report.pharmacogenomic_profile.detected_variants.len(), 2);
        assert_eq!(report.pharmacogenomic_profile.genes, vec!["CYP2C9", "VKORC1"]);
        assert!(!report.llm_generated_explanation.is_fallback);
        assert_eq!(report.llm_generated_explanation.structured.genetic_finding, "WARFARIN *2/*3");
        assert!(report.quality_metrics.vcf_parsing_success);
        assert_eq!(report.quality_metrics.genes_found, vec!["CYP2C9"]);
        assert_eq!(report.quality_metrics.genes_not_detected, vec!["VKORC1"]);
    }

    #[tokio::test]
    async fn test_unsupported_drug_is_not_an_error() {
        let reports = processor().analyze(request(WARFARIN_VCF, &["aspirin"])).await.unwrap();

        let report = &reports[0];
        assert_eq!(report.risk_assessment.risk_label, RiskLabel::Unknown);
        assert_eq!(report.risk_assessment.confidence_score, 0.0);
        assert_eq!(report.pharmacogenomic_profile.diplotype, "N/A");
        assert!(report.llm_generated_explanation.is_fallback);
        assert!(!report.llm_generated_explanation.summary.is_empty());
    }

    #[tokio::test]
    async fn test_output_order_follows_deduplicated_input() {
        let reports = processor()
            .analyze(request(WARFARIN_VCF, &["codeine, Warfarin", "CODEINE", "aspirin", "clopidogrel"]))
            .await
            .unwrap();

        let drugs: Vec<&str> = reports.iter().map(|r| r.drug.as_str()).collect();
        assert_eq!(drugs, vec!["CODEINE", "WARFARIN", "ASPIRIN", "CLOPIDOGREL"]);

        // One identifier and one timestamp per request
        assert!(reports.iter().all(|r| r.patient_id == reports[0].patient_id));
        assert!(reports.iter().all(|r| r.timestamp == reports[0].timestamp));
    }

    #[tokio::test]
    async fn test_oversized_file_rejected_before_parsing() {
        let service = Arc::new(UnreachableService { calls: AtomicUsize::new(0) });
        let kb = Arc::new(KnowledgeBase::embedded().unwrap());
        let processor = PgxProcessor::new(kb, ExplanationBridge::new(service.clone()));

        let mut big = request("", &["WARFARIN"]);
        big.file_bytes = vec![b'#'; crate::validator::MAX_FILE_SIZE + 1];

        let err = processor.analyze(big).await.unwrap_err();
        assert!(matches!(err, InputError::FileTooLarge { .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_explanation_service_falls_back() {
        let service = Arc::new(UnreachableService { calls: AtomicUsize::new(0) });
        let kb = Arc::new(KnowledgeBase::embedded().unwrap());
        let bridge = ExplanationBridge::new(service.clone())
            .with_max_attempts(2)
            .with_backoff(std::time::Duration::ZERO);
        let processor = PgxProcessor::new(kb, bridge);

        let reports = processor
            .analyze(request(WARFARIN_VCF, &["WARFARIN", "CODEINE", "ASPIRIN"]))
            .await
            .unwrap();

        for report in &reports {
            let explanation = &report.llm_generated_explanation;
            assert!(explanation.is_fallback);
            assert!(!explanation.summary.is_empty());
            assert!(!explanation.structured.recommended_action.is_empty());
            assert!(report.quality_metrics.vcf_parsing_success);
        }
        // Two supported drugs, two attempts each; the unsupported drug skips the service
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_repeat_runs_are_identical() {
        let processor = processor();
        let first = processor.analyze(request(WARFARIN_VCF, &["WARFARIN", "CODEINE"])).await.unwrap();
        let second = processor.analyze(request(WARFARIN_VCF, &["WARFARIN", "CODEINE"])).await.unwrap();

        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.risk_assessment, b.risk_assessment);
            assert_eq!(a.pharmacogenomic_profile, b.pharmacogenomic_profile);
            assert_eq!(a.decision_path_explanation, b.decision_path_explanation);
        }
    }

    #[tokio::test]
    async fn test_codeine_poor_metabolizer_alert_and_comparison() {
        let reports = processor()
            .analyze(request(WARFARIN_VCF, &["CODEINE", "TRAMADOL", "WARFARIN"]))
            .await
            .unwrap();

        let codeine = &reports[0];
        assert_eq!(codeine.pharmacogenomic_profile.diplotype, "*4/*4");
        assert_eq!(codeine.risk_assessment.risk_label, RiskLabel::Toxic);
        assert_eq!(codeine.risk_assessment.severity, Severity::Critical);
        let alert = codeine.clinical_alert.as_ref().unwrap();
        assert_eq!(alert.alert_level, AlertLevel::Critical);
        assert!(alert.action_required);
        assert!(codeine.clinical_recommendation.alternative_drug_suggestion.is_some());

        let comparison = codeine.drug_comparison_summary.as_ref().unwrap();
        assert_eq!(comparison.ranked_drugs.len(), 2);
        assert_eq!(Some(comparison), reports[1].drug_comparison_summary.as_ref());
        assert!(reports[2].drug_comparison_summary.is_none());
    }

    #[tokio::test]
    async fn test_warfarin_vkorc1_sensitivity_outranks_cyp2c9() {
        let vcf = "##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA12878\n\
10\t94981296\trs1057910\tA\tC\t.\tPASS\tGENE=CYP2C9;STAR=*3\tGT\t0/1\n\
16\t31107689\trs9923231\tC\tT\t.\tPASS\t.\tGT\t1/1\n";

        let reports = processor().analyze(request(vcf, &["WARFARIN"])).await.unwrap();
        let report = &reports[0];
        let profile = &report.pharmacogenomic_profile;

        assert_eq!(profile.determining_gene.as_deref(), Some("VKORC1"));
        assert_eq!(profile.diplotype, "*2/*2");
        assert_eq!(profile.phenotype, Phenotype::Poor);
        assert_eq!(report.risk_assessment.risk_label, RiskLabel::AdjustDosage);
        assert_eq!(report.risk_assessment.severity, Severity::High);
        assert!(report.decision_path_explanation.contains("WARFARIN/VKORC1/PM"));

        let genes: Vec<&str> = profile.gene_profiles.iter().map(|p| p.gene.as_str()).collect();
        assert_eq!(genes, vec!["CYP2C9", "VKORC1"]);
        let cyp2c9 = &profile.gene_profiles[0];
        assert!(cyp2c9.gene_found);
        assert_eq!(cyp2c9.phenotype, Phenotype::Intermediate);
        assert!(report.quality_metrics.genes_not_detected.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_file_degrades() {
        let reports = processor()
            .analyze(request("this is not a vcf\nat all\n", &["CLOPIDOGREL"]))
            .await
            .unwrap();

        let report = &reports[0];
        assert!(!report.quality_metrics.vcf_parsing_success);
        assert_eq!(report.quality_metrics.lines_skipped, 2);
        assert_eq!(report.pharmacogenomic_profile.diplotype, "*1/*1");
        assert!(report.risk_assessment.confidence_score < 0.5);
        assert!(report.patient_id.starts_with("PATIENT_"));
    }

    #[tokio::test]
    async fn test_gzip_matches_plain() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(WARFARIN_VCF.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let processor = processor();
        let plain = processor.analyze(request(WARFARIN_VCF, &["WARFARIN"])).await.unwrap();
        let gz = processor
            .analyze(AnalysisRequest {
                file_name: Some("patient.vcf.gz".to_string()),
                file_bytes: compressed,
                drugs: vec!["WARFARIN".to_string()],
                patient_id: Some("P-1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(gz[0].patient_id, "P-1");
        assert_eq!(plain[0].risk_assessment, gz[0].risk_assessment);
        assert_eq!(plain[0].pharmacogenomic_profile, gz[0].pharmacogenomic_profile);
    }
}
