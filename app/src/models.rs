// ==============================================================================
// models.rs - Pharmacogenomic Data Models
// ==============================================================================
// Description: Variant records, star-allele diplotypes and gene profiles shared
//              by the parser, allele resolver, phenotype caller and rule engine
// Author: Matt Barham
// Created: 2026-02-02
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Wild-type star allele assumed when no qualifying variant is present
pub const WILD_TYPE_ALLELE: &str = "*1";

/// Zygosity of the sample genotype at a variant position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zygosity {
    /// 0/0 - sample carries only the reference allele
    HomRef,
    /// 0/1 or 1/0 - one alternate copy
    Het,
    /// 1/1 - two alternate copies
    HomAlt,
    /// No sample column, no GT key, or a no-call (./.)
    Unknown,
}

impl Zygosity {
    /// Derive zygosity from a VCF GT value ("0/1", "1|1", "./.")
    pub fn from_gt(gt: &str) -> Self {
        let alleles: Vec<&str> = gt.split(['/', '|']).collect();
        if alleles.iter().any(|a| *a == "." || a.is_empty()) {
            return Zygosity::Unknown;
        }

        let alt_copies = alleles.iter().filter(|a| **a != "0").count();
        match (alleles.len(), alt_copies) {
            (_, 0) => Zygosity::HomRef,
            // Haploid calls ("1") count as a single copy
            (1, _) => Zygosity::Het,
            (n, c) if c >= n => Zygosity::HomAlt,
            _ => Zygosity::Het,
        }
    }

    /// Number of alternate-allele copies this call contributes
    pub fn alt_copies(&self) -> u8 {
        match self {
            Zygosity::HomRef => 0,
            Zygosity::Het | Zygosity::Unknown => 1,
            Zygosity::HomAlt => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zygosity::HomRef => "hom_ref",
            Zygosity::Het => "het",
            Zygosity::HomAlt => "hom_alt",
            Zygosity::Unknown => "unknown",
        }
    }
}

/// Parsed VCF data line with the annotations the pipeline needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    /// Chromosome as written in the file (e.g., "22" or "chr22")
    pub chromosome: String,

    /// 1-based position
    pub position: u64,

    /// rsID from the ID column, falling back to the INFO RS tag
    pub rsid: Option<String>,

    /// Reference allele
    pub ref_allele: String,

    /// Alternate allele(s), comma-joined as in the file
    pub alt_allele: String,

    /// Raw GT value of the first sample, if present
    pub genotype: Option<String>,

    /// Zygosity derived from `genotype`
    pub zygosity: Zygosity,

    /// INFO GENE tag, upper-cased
    pub gene: Option<String>,

    /// INFO STAR tag, normalised to start with '*'
    pub star: Option<String>,

    /// Full INFO key/value map (flags map to an empty string)
    pub info: BTreeMap<String, String>,
}

/// Allele function class used by the phenotype caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlleleFunction {
    Increased,
    Normal,
    Decreased,
    NoFunction,
}

impl AlleleFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlleleFunction::Increased => "increased",
            AlleleFunction::Normal => "normal",
            AlleleFunction::Decreased => "decreased",
            AlleleFunction::NoFunction => "no_function",
        }
    }
}

/// Metabolizer phenotype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phenotype {
    #[serde(rename = "PM")]
    Poor,
    #[serde(rename = "IM")]
    Intermediate,
    #[serde(rename = "NM")]
    Normal,
    #[serde(rename = "RM")]
    Rapid,
    #[serde(rename = "URM")]
    Ultrarapid,
    Unknown,
}

impl Phenotype {
    /// Short code used in rule tables and reports
    pub fn code(&self) -> &'static str {
        match self {
            Phenotype::Poor => "PM",
            Phenotype::Intermediate => "IM",
            Phenotype::Normal => "NM",
            Phenotype::Rapid => "RM",
            Phenotype::Ultrarapid => "URM",
            Phenotype::Unknown => "Unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Phenotype::Poor => "Poor Metabolizer",
            Phenotype::Intermediate => "Intermediate Metabolizer",
            Phenotype::Normal => "Normal Metabolizer",
            Phenotype::Rapid => "Rapid Metabolizer",
            Phenotype::Ultrarapid => "Ultrarapid Metabolizer",
            Phenotype::Unknown => "Unknown Metabolizer Status",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "PM" => Some(Phenotype::Poor),
            "IM" => Some(Phenotype::Intermediate),
            "NM" => Some(Phenotype::Normal),
            "RM" => Some(Phenotype::Rapid),
            "URM" | "UM" => Some(Phenotype::Ultrarapid),
            "UNKNOWN" => Some(Phenotype::Unknown),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Phenotype::Unknown)
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// CPIC-derived risk label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLabel {
    Safe,
    #[serde(rename = "Adjust Dosage")]
    AdjustDosage,
    Toxic,
    Ineffective,
    Unknown,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Safe => "Safe",
            RiskLabel::AdjustDosage => "Adjust Dosage",
            RiskLabel::Toxic => "Toxic",
            RiskLabel::Ineffective => "Ineffective",
            RiskLabel::Unknown => "Unknown",
        }
    }

    /// Severity band implied by the label when a rule does not override it
    pub fn default_severity(&self) -> Severity {
        match self {
            RiskLabel::Safe => Severity::None,
            RiskLabel::AdjustDosage => Severity::Moderate,
            RiskLabel::Ineffective => Severity::High,
            RiskLabel::Toxic => Severity::Critical,
            RiskLabel::Unknown => Severity::Low,
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity band, ordered from none to critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical findings warrant a clinical alert
    pub fn requires_alert(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPIC classification of an individual recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStrength {
    Strong,
    Moderate,
    Optional,
}

impl RecommendationStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStrength::Strong => "strong",
            RecommendationStrength::Moderate => "moderate",
            RecommendationStrength::Optional => "optional",
        }
    }
}

/// Sort key for star-allele labels: numeric part first, then suffix
///
/// "*1" < "*1xN" < "*2" < "*3" < "*3A" < "*10". Labels without digits sort last.
pub fn star_sort_key(star: &str) -> (u32, String) {
    let body = star.trim_start_matches('*');
    let digits: String = body.chars().take_while(|c| c.is_ascii_digit()).collect();
    let suffix = body[digits.len()..].to_string();
    let number = digits.parse::<u32>().unwrap_or(u32::MAX);
    (number, suffix)
}

/// Compare two star-allele labels in nomenclature order
pub fn compare_stars(a: &str, b: &str) -> Ordering {
    star_sort_key(a).cmp(&star_sort_key(b))
}

/// Normalise a STAR tag value ("2" -> "*2", " *3A " -> "*3A")
pub fn normalize_star(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }
    if trimmed.starts_with('*') {
        Some(trimmed.to_string())
    } else {
        Some(format!("*{}", trimmed))
    }
}

/// Ordered pair of star alleles (e.g., *2/*3)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diplotype {
    first: String,
    second: String,
}

impl Diplotype {
    /// Build a diplotype, ordering the alleles by star number
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if compare_stars(&a, &b) == Ordering::Greater {
            Self { first: b, second: a }
        } else {
            Self { first: a, second: b }
        }
    }

    /// *1/*1
    pub fn wild_type() -> Self {
        Self::new(WILD_TYPE_ALLELE, WILD_TYPE_ALLELE)
    }

    pub fn alleles(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }

    pub fn is_wild_type(&self) -> bool {
        self.first == WILD_TYPE_ALLELE && self.second == WILD_TYPE_ALLELE
    }
}

impl fmt::Display for Diplotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

impl Serialize for Diplotype {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Variant reported back to the caller as evidence for a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedVariant {
    /// rsID, or CHROM:POS when the record has none
    pub rsid: String,
    pub gene: String,
    pub star: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genotype: Option<String>,
}

/// Per-gene result of allele resolution and phenotype calling
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneProfile {
    /// Gene symbol (e.g., "CYP2C9")
    pub gene: String,

    pub diplotype: Diplotype,

    pub phenotype: Phenotype,

    /// True when at least one record for this gene was present in the file
    pub gene_found: bool,

    /// True when more than two distinct star alleles were reported
    pub ambiguous_call: bool,

    /// Every distinct non-wild-type star allele reported, in star order
    pub reported_alleles: Vec<String>,

    /// Records that contributed to this call
    #[serde(skip)]
    pub variants: Vec<VariantRecord>,
}

impl GeneProfile {
    /// Profile for a gene with no evidence in the file
    pub fn not_detected(gene: impl Into<String>) -> Self {
        Self {
            gene: gene.into(),
            diplotype: Diplotype::wild_type(),
            phenotype: Phenotype::Unknown,
            gene_found: false,
            ambiguous_call: false,
            reported_alleles: Vec::new(),
            variants: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zygosity_from_gt() {
        assert_eq!(Zygosity::from_gt("0/0"), Zygosity::HomRef);
        assert_eq!(Zygosity::from_gt("0|1"), Zygosity::Het);
        assert_eq!(Zygosity::from_gt("1/0"), Zygosity::Het);
        assert_eq!(Zygosity::from_gt("1/1"), Zygosity::HomAlt);
        assert_eq!(Zygosity::from_gt("1|2"), Zygosity::HomAlt);
        assert_eq!(Zygosity::from_gt("./."), Zygosity::Unknown);
        assert_eq!(Zygosity::from_gt("1"), Zygosity::Het);
    }

    #[test]
    fn test_star_ordering() {
        assert_eq!(compare_stars("*2", "*3"), Ordering::Less);
        assert_eq!(compare_stars("*10", "*3"), Ordering::Greater);
        assert_eq!(compare_stars("*3", "*3A"), Ordering::Less);
        assert_eq!(compare_stars("*1", "*1xN"), Ordering::Less);
        assert_eq!(compare_stars("*1xN", "*2"), Ordering::Less);
    }

    #[test]
    fn test_diplotype_orders_alleles() {
        assert_eq!(Diplotype::new("*3", "*2").to_string(), "*2/*3");
        assert_eq!(Diplotype::new("*17", "*2").to_string(), "*2/*17");
        assert!(Diplotype::wild_type().is_wild_type());
    }

    #[test]
    fn test_normalize_star() {
        assert_eq!(normalize_star("2").as_deref(), Some("*2"));
        assert_eq!(normalize_star(" *3A ").as_deref(), Some("*3A"));
        assert_eq!(normalize_star("."), None);
        assert_eq!(normalize_star(""), None);
    }

    #[test]
    fn test_phenotype_codes() {
        assert_eq!(Phenotype::from_code("im"), Some(Phenotype::Intermediate));
        assert_eq!(Phenotype::from_code("UM"), Some(Phenotype::Ultrarapid));
        assert_eq!(Phenotype::Poor.code(), "PM");
        assert_eq!(
            serde_json::to_string(&Phenotype::Ultrarapid).unwrap(),
            "\"URM\""
        );
    }

    #[test]
    fn test_risk_label_severity_defaults() {
        assert_eq!(RiskLabel::Safe.default_severity(), Severity::None);
        assert_eq!(RiskLabel::AdjustDosage.default_severity(), Severity::Moderate);
        assert_eq!(RiskLabel::Ineffective.default_severity(), Severity::High);
        assert_eq!(RiskLabel::Toxic.default_severity(), Severity::Critical);
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High.requires_alert());
        assert!(!Severity::Moderate.requires_alert());
        assert_eq!(
            serde_json::to_string(&RiskLabel::AdjustDosage).unwrap(),
            "\"Adjust Dosage\""
        );
    }
}
