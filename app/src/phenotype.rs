// ==============================================================================
// phenotype.rs - Metabolizer Phenotype Calling
// ==============================================================================
// Description: Maps star-allele diplotypes to metabolizer phenotypes through
//              per-gene allele function tables
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================

use tracing::debug;

use crate::knowledge_base::KnowledgeBase;
use crate::models::{Diplotype, GeneProfile, Phenotype};

/// Phenotype caller
///
/// Pure: the same (gene, diplotype) always yields the same phenotype.
pub struct PhenotypeCaller<'a> {
    kb: &'a KnowledgeBase,
}

impl<'a> PhenotypeCaller<'a> {
    pub fn new(kb: &'a KnowledgeBase) -> Self {
        Self { kb }
    }

    /// Call the phenotype for one diplotype
    ///
    /// Returns `Unknown` when the gene has no function table or either allele
    /// is missing from it.
    pub fn call(&self, gene: &str, diplotype: &Diplotype) -> Phenotype {
        if !self.kb.has_function_table(gene) {
            debug!("{}: no allele function table", gene);
            return Phenotype::Unknown;
        }

        let (a, b) = diplotype.alleles();
        let (Some(fa), Some(fb)) = (
            self.kb.allele_function(gene, a),
            self.kb.allele_function(gene, b),
        ) else {
            debug!("{}: {} contains an allele of unknown function", gene, diplotype);
            return Phenotype::Unknown;
        };

        self.kb.phenotype_for(gene, fa, fb).unwrap_or(Phenotype::Unknown)
    }

    /// Attach phenotypes to resolved profiles
    pub fn call_profiles(&self, profiles: Vec<GeneProfile>) -> Vec<GeneProfile> {
        profiles
            .into_iter()
            .map(|mut profile| {
                profile.phenotype = self.call(&profile.gene, &profile.diplotype);
                profile
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(gene: &str, a: &str, b: &str) -> Phenotype {
        let kb = KnowledgeBase::embedded().unwrap();
        PhenotypeCaller::new(&kb).call(gene, &Diplotype::new(a, b))
    }

    #[test]
    fn test_cyp2c9_compound_heterozygote_is_intermediate() {
        assert_eq!(call("CYP2C9", "*2", "*3"), Phenotype::Intermediate);
        assert_eq!(call("CYP2C9", "*3", "*2"), Phenotype::Intermediate);
    }

    #[test]
    fn test_default_phenotypes() {
        assert_eq!(call("CYP2C19", "*1", "*1"), Phenotype::Normal);
        assert_eq!(call("CYP2C19", "*2", "*2"), Phenotype::Poor);
        assert_eq!(call("CYP2C19", "*1", "*17"), Phenotype::Rapid);
        assert_eq!(call("CYP2C19", "*17", "*17"), Phenotype::Ultrarapid);
        assert_eq!(call("TPMT", "*1", "*3A"), Phenotype::Intermediate);
    }

    #[test]
    fn test_gene_specific_rows_override_defaults() {
        // Default row would give IM
        assert_eq!(call("CYP2D6", "*1", "*10"), Phenotype::Normal);
        assert_eq!(call("CYP2D6", "*1xN", "*1"), Phenotype::Ultrarapid);
        assert_eq!(call("CYP2D6", "*4", "*4"), Phenotype::Poor);
    }

    #[test]
    fn test_unknown_allele_or_gene() {
        assert_eq!(call("CYP2C9", "*1", "*99"), Phenotype::Unknown);
        assert_eq!(call("HLA-B", "*1", "*1"), Phenotype::Unknown);
    }

    #[test]
    fn test_call_profiles() {
        let kb = KnowledgeBase::embedded().unwrap();
        let profiles = PhenotypeCaller::new(&kb).call_profiles(vec![GeneProfile::not_detected("CYP2D6")]);
        assert_eq!(profiles[0].phenotype, Phenotype::Normal);
    }
}
