// ==============================================================================
// allele_resolver.rs - Star-Allele Diplotype Resolution
// ==============================================================================
// Description: Attributes variant records to pharmacogenes and star alleles,
//              then derives one diplotype per relevant gene
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================
// Attribution order:
//   1. rsID listed in the known-marker table
//   2. INFO GENE + STAR (STAR may hold a pre-called diplotype, e.g. *1/*4)
//   3. INFO GENE without STAR = wild-type (*1) evidence
// ==============================================================================

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::knowledge_base::KnowledgeBase;
use crate::models::{
    compare_stars, normalize_star, DetectedVariant, Diplotype, GeneProfile, Phenotype,
    VariantRecord, Zygosity, WILD_TYPE_ALLELE,
};

/// Evidence gathered for one non-wild-type allele
#[derive(Debug, Default, Clone, Copy)]
struct AlleleTally {
    /// Records reporting the allele
    records: usize,
    /// Largest number of copies implied by any single record
    copies: usize,
}

/// Evidence gathered for one gene
#[derive(Debug, Default)]
struct GeneEvidence {
    alleles: BTreeMap<String, AlleleTally>,
    variants: Vec<VariantRecord>,
}

/// Gene allele resolver backed by the knowledge base marker table
pub struct GeneAlleleResolver<'a> {
    kb: &'a KnowledgeBase,
}

impl<'a> GeneAlleleResolver<'a> {
    pub fn new(kb: &'a KnowledgeBase) -> Self {
        Self { kb }
    }

    /// Resolve one profile per gene in `genes`, in the order given
    ///
    /// Phenotypes are left as `Unknown`; the phenotype caller fills them in.
    pub fn resolve(&self, records: &[VariantRecord], genes: &[String]) -> Vec<GeneProfile> {
        let mut evidence: HashMap<&str, GeneEvidence> =
            genes.iter().map(|g| (g.as_str(), GeneEvidence::default())).collect();

        for record in records {
            let Some((gene, stars)) = self.attribute(record) else {
                continue;
            };
            let Some(entry) = evidence.get_mut(gene.as_str()) else {
                continue;
            };

            entry.variants.push(record.clone());

            // 0/0 proves the locus was assayed; the sample carries only *1 here
            if record.zygosity == Zygosity::HomRef {
                continue;
            }

            let pre_called = stars.len() > 1;
            let mut per_record: BTreeMap<String, usize> = BTreeMap::new();
            for star in stars.into_iter().filter(|s| s != WILD_TYPE_ALLELE) {
                let copies = if pre_called {
                    1
                } else {
                    record.zygosity.alt_copies() as usize
                };
                *per_record.entry(star).or_default() += copies;
            }

            // Markers of one haplotype (e.g. TPMT *3A) must not add up across records
            for (star, copies) in per_record {
                let tally = entry.alleles.entry(star).or_default();
                tally.records += 1;
                tally.copies = tally.copies.max(copies);
            }
        }

        genes
            .iter()
            .map(|gene| match evidence.remove(gene.as_str()) {
                Some(ev) if !ev.variants.is_empty() => build_profile(gene, ev),
                _ => GeneProfile::not_detected(gene.clone()),
            })
            .collect()
    }

    /// Non-reference records that contributed to a profile
    pub fn detected_variants(&self, profile: &GeneProfile) -> Vec<DetectedVariant> {
        profile
            .variants
            .iter()
            .filter(|r| r.zygosity != Zygosity::HomRef)
            .filter_map(|record| {
                let (_, stars) = self.attribute(record)?;
                Some(DetectedVariant {
                    rsid: record
                        .rsid
                        .clone()
                        .unwrap_or_else(|| format!("{}:{}", record.chromosome, record.position)),
                    gene: profile.gene.clone(),
                    star: stars.join("/"),
                    genotype: record.genotype.clone(),
                })
            })
            .collect()
    }

    /// Map a record to (gene, star alleles) or `None` when it carries no PGx meaning
    fn attribute(&self, record: &VariantRecord) -> Option<(String, Vec<String>)> {
        if let Some(marker) = record.rsid.as_deref().and_then(|id| self.kb.known_variant(id)) {
            if let Some(info_gene) = &record.gene {
                if info_gene != &marker.gene {
                    warn!(
                        "{} annotated as {} but is a known {} marker; using {}",
                        marker.rsid, info_gene, marker.gene, marker.gene
                    );
                }
            }
            return Some((marker.gene.clone(), vec![marker.star.clone()]));
        }

        let gene = record.gene.clone()?;
        let stars = match &record.star {
            Some(star) if star.contains('/') => star
                .split('/')
                .filter_map(normalize_star)
                .collect::<Vec<_>>(),
            Some(star) => vec![star.clone()],
            None => vec![WILD_TYPE_ALLELE.to_string()],
        };

        if stars.is_empty() {
            return Some((gene, vec![WILD_TYPE_ALLELE.to_string()]));
        }
        Some((gene, stars))
    }
}

/// Turn gathered evidence into a diplotype
fn build_profile(gene: &str, evidence: GeneEvidence) -> GeneProfile {
    let mut reported: Vec<String> = evidence.alleles.keys().cloned().collect();
    reported.sort_by(|a, b| compare_stars(a, b));

    let (diplotype, ambiguous) = match reported.len() {
        0 => (Diplotype::wild_type(), false),
        1 => {
            let allele = &reported[0];
            let copies = evidence.alleles[allele].copies;
            if copies >= 2 {
                (Diplotype::new(allele.clone(), allele.clone()), false)
            } else {
                (Diplotype::new(WILD_TYPE_ALLELE, allele.clone()), false)
            }
        }
        2 => (Diplotype::new(reported[0].clone(), reported[1].clone()), false),
        _ => {
            // Most supporting records first, then lowest star number
            let mut ranked: Vec<(&String, &AlleleTally)> = evidence.alleles.iter().collect();
            ranked.sort_by(|(a, ta), (b, tb)| match tb.records.cmp(&ta.records) {
                Ordering::Equal => compare_stars(a, b),
                other => other,
            });
            warn!(
                "{}: {} star alleles reported ({}); keeping {} and {}",
                gene,
                reported.len(),
                reported.join(", "),
                ranked[0].0,
                ranked[1].0
            );
            (Diplotype::new(ranked[0].0.clone(), ranked[1].0.clone()), true)
        }
    };

    debug!(
        "{}: {} record(s), alleles [{}] -> {}",
        gene,
        evidence.variants.len(),
        reported.join(", "),
        diplotype
    );

    GeneProfile {
        gene: gene.to_string(),
        diplotype,
        phenotype: Phenotype::Unknown,
        gene_found: true,
        ambiguous_call: ambiguous,
        reported_alleles: reported,
        variants: evidence.variants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::VcfParser;

    const HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n";

    fn resolve(body: &str, genes: &[&str]) -> Vec<GeneProfile> {
        let kb = KnowledgeBase::embedded().unwrap();
        let parsed = VcfParser::new().parse_str(&format!("{}{}", HEADER, body));
        let genes: Vec<String> = genes.iter().map(|g| g.to_string()).collect();
        GeneAlleleResolver::new(&kb).resolve(&parsed.records, &genes)
    }

    #[test]
    fn test_compound_heterozygote() {
        let profiles = resolve(
            "10\t94942290\trs1799853\tC\tT\t.\tPASS\tGENE=CYP2C9;STAR=*2\tGT\t0/1\n\
             10\t94981296\trs1057910\tA\tC\t.\tPASS\tGENE=CYP2C9;STAR=*3\tGT\t0/1\n",
            &["CYP2C9"],
        );

        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].diplotype.to_string(), "*2/*3");
        assert!(profiles[0].gene_found);
        assert!(!profiles[0].ambiguous_call);
        assert_eq!(profiles[0].variants.len(), 2);
    }

    #[test]
    fn test_missing_gene_is_wild_type() {
        let profiles = resolve("", &["CYP2D6", "VKORC1"]);

        assert_eq!(profiles[0].gene, "CYP2D6");
        assert_eq!(profiles[0].diplotype.to_string(), "*1/*1");
        assert!(!profiles[0].gene_found);
        assert_eq!(profiles[1].gene, "VKORC1");
    }

    #[test]
    fn test_known_marker_without_info_tags() {
        let profiles = resolve("19\t94781859\trs4244285\tG\tA\t.\tPASS\t.\tGT\t1/1\n", &["CYP2C19"]);

        assert_eq!(profiles[0].diplotype.to_string(), "*2/*2");
        assert!(profiles[0].gene_found);
    }

    #[test]
    fn test_hom_ref_counts_as_found() {
        let profiles = resolve(
            "10\t94942290\trs1799853\tC\tT\t.\tPASS\tGENE=CYP2C9;STAR=*2\tGT\t0/0\n",
            &["CYP2C9"],
        );

        assert_eq!(profiles[0].diplotype.to_string(), "*1/*1");
        assert!(profiles[0].gene_found);
        assert!(profiles[0].reported_alleles.is_empty());
    }

    #[test]
    fn test_single_het_allele_pairs_with_wild_type() {
        let profiles = resolve(
            "22\t42126611\t.\tC\tG\t.\tPASS\tGENE=CYP2D6;STAR=*10\tGT\t0/1\n",
            &["CYP2D6"],
        );
        assert_eq!(profiles[0].diplotype.to_string(), "*1/*10");
    }

    #[test]
    fn test_pre_called_diplotype_in_star_tag() {
        let profiles = resolve(
            "22\t42130692\t.\tG\tA\t.\tPASS\tGENE=CYP2D6;STAR=*1/*4\n",
            &["CYP2D6"],
        );
        assert_eq!(profiles[0].diplotype.to_string(), "*1/*4");

        let profiles = resolve(
            "22\t42130692\t.\tG\tA\t.\tPASS\tGENE=CYP2D6;STAR=*4/*4\n",
            &["CYP2D6"],
        );
        assert_eq!(profiles[0].diplotype.to_string(), "*4/*4");
    }

    #[test]
    fn test_ambiguous_call_keeps_best_supported() {
        let profiles = resolve(
            "22\t1\t.\tA\tG\t.\tPASS\tGENE=CYP2D6;STAR=*10\tGT\t0/1\n\
             22\t2\t.\tA\tG\t.\tPASS\tGENE=CYP2D6;STAR=*4\tGT\t0/1\n\
             22\t3\t.\tA\tG\t.\tPASS\tGENE=CYP2D6;STAR=*41\tGT\t0/1\n\
             22\t4\t.\tA\tG\t.\tPASS\tGENE=CYP2D6;STAR=*41\tGT\t0/1\n",
            &["CYP2D6"],
        );

        let profile = &profiles[0];
        assert!(profile.ambiguous_call);
        assert_eq!(profile.reported_alleles, vec!["*4", "*10", "*41"]);
        // *41 has two records; *4 beats *10 on star number
        assert_eq!(profile.diplotype.to_string(), "*4/*41");
    }

    #[test]
    fn test_detected_variants_skip_hom_ref() {
        let kb = KnowledgeBase::embedded().unwrap();
        let parsed = VcfParser::new().parse_str(&format!(
            "{}{}",
            HEADER,
            "10\t94942290\trs1799853\tC\tT\t.\tPASS\t.\tGT\t0/1\n\
             10\t94981296\trs1057910\tA\tC\t.\tPASS\t.\tGT\t0/0\n"
        ));
        let resolver = GeneAlleleResolver::new(&kb);
        let profiles = resolver.resolve(&parsed.records, &["CYP2C9".to_string()]);

        let detected = resolver.detected_variants(&profiles[0]);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].rsid, "rs1799853");
        assert_eq!(detected[0].star, "*2");
        assert_eq!(detected[0].genotype.as_deref(), Some("0/1"));
    }

    #[test]
    fn test_haplotype_markers_do_not_stack() {
        // rs1800460 and rs1142345 both define TPMT *3A
        let profiles = resolve(
            "6\t18139228\trs1800460\tC\tT\t.\tPASS\t.\tGT\t0/1\n\
             6\t18130918\trs1142345\tT\tC\t.\tPASS\t.\tGT\t0/1\n",
            &["TPMT"],
        );
        assert_eq!(profiles[0].diplotype.to_string(), "*1/*3A");
    }

    #[test]
    fn test_irrelevant_genes_ignored() {
        let profiles = resolve(
            "10\t94942290\trs1799853\tC\tT\t.\tPASS\tGENE=CYP2C9;STAR=*2\tGT\t0/1\n",
            &["CYP2D6"],
        );
        assert!(!profiles[0].gene_found);
    }
}
