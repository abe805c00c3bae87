// ==============================================================================
// quality.rs - Analysis Quality Metrics
// ==============================================================================
// Description: Request-level quality metrics attached to every drug report
// Author: Matt Barham
// Created: 2026-02-05
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================

use serde::Serialize;

use crate::models::GeneProfile;
use crate::parsers::ParsedVcf;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub vcf_parsing_success: bool,

    /// Relevant genes with at least one record in the file
    pub genes_found: Vec<String>,

    /// Relevant genes with no record in the file
    pub genes_not_detected: Vec<String>,

    pub input_file_size_bytes: u64,

    pub all_required_genes_available: bool,

    /// Some lines were skipped or some relevant genes were missing
    pub incomplete_variant_data: bool,

    pub records_parsed: usize,

    pub lines_skipped: usize,

    pub parsing_warnings: Vec<String>,
}

impl QualityMetrics {
    /// Aggregate metrics for one request
    ///
    /// `profiles` covers the union of genes relevant to the requested drugs.
    pub fn compute(parsed: &ParsedVcf, profiles: &[GeneProfile], input_file_size_bytes: u64) -> Self {
        let (found, missing): (Vec<&GeneProfile>, Vec<&GeneProfile>) =
            profiles.iter().partition(|p| p.gene_found);

        let genes_found: Vec<String> = found.iter().map(|p| p.gene.clone()).collect();
        let genes_not_detected: Vec<String> = missing.iter().map(|p| p.gene.clone()).collect();

        let all_required_genes_available = genes_not_detected.is_empty();

        Self {
            vcf_parsing_success: parsed.parse_success(),
            incomplete_variant_data: parsed.skipped_lines > 0 || !all_required_genes_available,
            genes_found,
            genes_not_detected,
            input_file_size_bytes,
            all_required_genes_available,
            records_parsed: parsed.records.len(),
            lines_skipped: parsed.skipped_lines,
            parsing_warnings: parsed.warnings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::VcfParser;

    #[test]
    fn test_compute_metrics() {
        let parsed = VcfParser::new().parse_str(
            "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             10\t94942290\trs1799853\tC\tT\t.\tPASS\tGENE=CYP2C9;STAR=*2\n\
             broken line\n",
        );
        let mut cyp2c9 = GeneProfile::not_detected("CYP2C9");
        cyp2c9.gene_found = true;
        let profiles = vec![cyp2c9, GeneProfile::not_detected("VKORC1")];

        let metrics = QualityMetrics::compute(&parsed, &profiles, 1234);

        assert!(metrics.vcf_parsing_success);
        assert_eq!(metrics.genes_found, vec!["CYP2C9"]);
        assert_eq!(metrics.genes_not_detected, vec!["VKORC1"]);
        assert_eq!(metrics.input_file_size_bytes, 1234);
        assert!(!metrics.all_required_genes_available);
        assert!(metrics.incomplete_variant_data);
        assert_eq!(metrics.records_parsed, 1);
        assert_eq!(metrics.lines_skipped, 1);
        assert_eq!(metrics.parsing_warnings.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let parsed = ParsedVcf::degraded("not a VCF");
        let metrics = QualityMetrics::compute(&parsed, &[], 0);

        assert!(!metrics.vcf_parsing_success);
        assert!(metrics.all_required_genes_available);
        assert!(!metrics.incomplete_variant_data);
        assert_eq!(metrics.parsing_warnings, vec!["not a VCF"]);
    }
}
