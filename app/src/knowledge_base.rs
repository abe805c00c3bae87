// ==============================================================================
// knowledge_base.rs - Pharmacogenomic Reference Tables
// ==============================================================================
// Description: Read-only drug panel, star-allele marker, allele function,
//              phenotype and CPIC rule tables, loaded once at start-up
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================
// Tables (CSV with header, embedded at compile time, overridable from a dir):
//   drugs.csv             drug,pathway,evidence_level,guideline,alternative
//   drug_genes.csv        drug,gene,rank,requires_evidence
//   known_variants.csv    rsid,gene,star
//   allele_functions.csv  gene,star,function
//   phenotype_map.csv     gene,function_a,function_b,phenotype  (gene "*" = default)
//   cpic_rules.csv        drug,gene,phenotype,risk_label,severity,strength,recommendation
//   VERSION               single line
// ==============================================================================

use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{
    AlleleFunction, Phenotype, RecommendationStrength, RiskLabel, Severity, WILD_TYPE_ALLELE,
};

/// Gene key used for default diplotype-to-phenotype rows
const DEFAULT_GENE_KEY: &str = "*";

const EMBEDDED_VERSION: &str = include_str!("../data/VERSION");
const EMBEDDED_DRUGS: &str = include_str!("../data/drugs.csv");
const EMBEDDED_DRUG_GENES: &str = include_str!("../data/drug_genes.csv");
const EMBEDDED_KNOWN_VARIANTS: &str = include_str!("../data/known_variants.csv");
const EMBEDDED_ALLELE_FUNCTIONS: &str = include_str!("../data/allele_functions.csv");
const EMBEDDED_PHENOTYPE_MAP: &str = include_str!("../data/phenotype_map.csv");
const EMBEDDED_CPIC_RULES: &str = include_str!("../data/cpic_rules.csv");

/// Knowledge base loading errors
#[derive(Error, Debug)]
pub enum KnowledgeBaseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {table} table: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("Inconsistent knowledge base: {0}")]
    Invalid(String),
}

/// One supported drug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugDefinition {
    /// Upper-cased drug name (e.g., "WARFARIN")
    pub drug: String,

    /// Metabolic pathway shared by interchangeable drugs
    pub pathway: String,

    /// CPIC evidence level of the drug-gene pair (A, A/B, B, ...)
    pub evidence_level: String,

    /// Guideline title
    pub guideline: String,

    /// Suggested alternative when the drug is contraindicated
    pub alternative: Option<String>,
}

/// Drug to gene association
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugGene {
    pub drug: String,
    pub gene: String,

    /// 1 = primary gene; ties in multi-gene precedence go to the lower rank
    pub rank: u8,

    /// When true, a gene absent from the file is Unknown rather than *1/*1
    pub requires_evidence: bool,
}

/// Star-allele-defining marker keyed by rsID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownVariant {
    pub rsid: String,
    pub gene: String,
    pub star: String,
}

/// CPIC rule keyed by (drug, gene, phenotype)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpicRule {
    pub drug: String,
    pub gene: String,
    pub phenotype: Phenotype,
    pub risk_label: RiskLabel,

    /// Overrides the label's default severity when set
    pub severity: Option<Severity>,

    pub strength: RecommendationStrength,
    pub recommendation: String,
}

impl CpicRule {
    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or_else(|| self.risk_label.default_severity())
    }

    /// Stable identifier used in decision traces
    pub fn rule_id(&self) -> String {
        format!("{}/{}/{}", self.drug, self.gene, self.phenotype.code())
    }
}

#[derive(Debug, Deserialize)]
struct AlleleFunctionRow {
    gene: String,
    star: String,
    function: AlleleFunction,
}

#[derive(Debug, Deserialize)]
struct PhenotypeMapRow {
    gene: String,
    function_a: AlleleFunction,
    function_b: AlleleFunction,
    phenotype: Phenotype,
}

/// Raw table text, from the embedded copy or a directory
struct TableSources {
    version: String,
    drugs: String,
    drug_genes: String,
    known_variants: String,
    allele_functions: String,
    phenotype_map: String,
    cpic_rules: String,
}

/// In-memory pharmacogenomic knowledge base
///
/// Built once at start-up and shared as `Arc<KnowledgeBase>`; never mutated.
#[derive(Debug)]
pub struct KnowledgeBase {
    version: String,
    drugs: BTreeMap<String, DrugDefinition>,
    drug_genes: HashMap<String, Vec<DrugGene>>,
    known_variants: HashMap<String, KnownVariant>,
    allele_functions: HashMap<String, HashMap<String, AlleleFunction>>,
    phenotype_map: HashMap<(String, AlleleFunction, AlleleFunction), Phenotype>,
    rules: HashMap<(String, String, Phenotype), CpicRule>,
}

impl KnowledgeBase {
    /// Load the tables compiled into the binary
    pub fn embedded() -> Result<Self, KnowledgeBaseError> {
        Self::from_sources(TableSources {
            version: EMBEDDED_VERSION.to_string(),
            drugs: EMBEDDED_DRUGS.to_string(),
            drug_genes: EMBEDDED_DRUG_GENES.to_string(),
            known_variants: EMBEDDED_KNOWN_VARIANTS.to_string(),
            allele_functions: EMBEDDED_ALLELE_FUNCTIONS.to_string(),
            phenotype_map: EMBEDDED_PHENOTYPE_MAP.to_string(),
            cpic_rules: EMBEDDED_CPIC_RULES.to_string(),
        })
    }

    /// Load the tables from a directory holding the same file names
    ///
    /// A missing VERSION file is tolerated; every CSV table is required.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, KnowledgeBaseError> {
        let dir = dir.as_ref();
        info!("Loading knowledge base from {:?}", dir);

        let read = |name: &str| -> Result<String, KnowledgeBaseError> {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|source| KnowledgeBaseError::Io { path, source })
        };

        let version = read("VERSION").unwrap_or_else(|_| {
            warn!("No VERSION file in {:?}, marking knowledge base as custom", dir);
            "custom".to_string()
        });

        Self::from_sources(TableSources {
            version,
            drugs: read("drugs.csv")?,
            drug_genes: read("drug_genes.csv")?,
            known_variants: read("known_variants.csv")?,
            allele_functions: read("allele_functions.csv")?,
            phenotype_map: read("phenotype_map.csv")?,
            cpic_rules: read("cpic_rules.csv")?,
        })
    }

    fn from_sources(sources: TableSources) -> Result<Self, KnowledgeBaseError> {
        let drugs: BTreeMap<String, DrugDefinition> = read_table::<DrugDefinition>("drugs", &sources.drugs)?
            .into_iter()
            .map(|mut d| {
                d.drug = d.drug.to_ascii_uppercase();
                (d.drug.clone(), d)
            })
            .collect();

        let mut drug_genes: HashMap<String, Vec<DrugGene>> = HashMap::new();
        for mut row in read_table::<DrugGene>("drug_genes", &sources.drug_genes)? {
            row.drug = row.drug.to_ascii_uppercase();
            row.gene = row.gene.to_ascii_uppercase();
            drug_genes.entry(row.drug.clone()).or_default().push(row);
        }
        for genes in drug_genes.values_mut() {
            genes.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.gene.cmp(&b.gene)));
        }

        let known_variants = read_table::<KnownVariant>("known_variants", &sources.known_variants)?
            .into_iter()
            .map(|mut v| {
                v.rsid = v.rsid.to_ascii_lowercase();
                v.gene = v.gene.to_ascii_uppercase();
                (v.rsid.clone(), v)
            })
            .collect();

        let mut allele_functions: HashMap<String, HashMap<String, AlleleFunction>> = HashMap::new();
        for row in read_table::<AlleleFunctionRow>("allele_functions", &sources.allele_functions)? {
            allele_functions
                .entry(row.gene.to_ascii_uppercase())
                .or_default()
                .insert(row.star, row.function);
        }

        let mut phenotype_map = HashMap::new();
        for row in read_table::<PhenotypeMapRow>("phenotype_map", &sources.phenotype_map)? {
            let gene = row.gene.to_ascii_uppercase();
            // Function pairs are unordered; store both orientations
            phenotype_map.insert((gene.clone(), row.function_a, row.function_b), row.phenotype);
            phenotype_map.insert((gene, row.function_b, row.function_a), row.phenotype);
        }

        let mut rules = HashMap::new();
        for mut rule in read_table::<CpicRule>("cpic_rules", &sources.cpic_rules)? {
            rule.drug = rule.drug.to_ascii_uppercase();
            rule.gene = rule.gene.to_ascii_uppercase();
            let key = (rule.drug.clone(), rule.gene.clone(), rule.phenotype);
            if rules.insert(key, rule).is_some() {
                return Err(KnowledgeBaseError::Invalid(
                    "duplicate CPIC rule for the same drug, gene and phenotype".to_string(),
                ));
            }
        }

        let kb = Self {
            version: sources.version.trim().to_string(),
            drugs,
            drug_genes,
            known_variants,
            allele_functions,
            phenotype_map,
            rules,
        };
        kb.validate()?;

        info!(
            "Knowledge base {} loaded: {} drugs, {} genes, {} markers, {} rules",
            kb.version,
            kb.drugs.len(),
            kb.supported_genes().len(),
            kb.known_variants.len(),
            kb.rules.len()
        );

        Ok(kb)
    }

    /// Check cross-table consistency
    pub fn validate(&self) -> Result<(), KnowledgeBaseError> {
        for drug in self.drugs.keys() {
            if self.genes_for(drug).is_empty() {
                return Err(KnowledgeBaseError::Invalid(format!(
                    "drug {} has no associated genes",
                    drug
                )));
            }
        }

        for (drug, genes) in &self.drug_genes {
            if !self.drugs.contains_key(drug) {
                return Err(KnowledgeBaseError::Invalid(format!(
                    "drug_genes references undeclared drug {}",
                    drug
                )));
            }
            for gene in genes {
                if !self.allele_functions.contains_key(&gene.gene) {
                    return Err(KnowledgeBaseError::Invalid(format!(
                        "gene {} (drug {}) has no allele function table",
                        gene.gene, drug
                    )));
                }
            }
        }

        for (drug, gene, _) in self.rules.keys() {
            if !self.genes_for(drug).iter().any(|g| &g.gene == gene) {
                return Err(KnowledgeBaseError::Invalid(format!(
                    "rule references undeclared drug/gene pair {}/{}",
                    drug, gene
                )));
            }
        }

        for (gene, table) in &self.allele_functions {
            if !table.contains_key(WILD_TYPE_ALLELE) {
                return Err(KnowledgeBaseError::Invalid(format!(
                    "gene {} has no {} allele function",
                    gene, WILD_TYPE_ALLELE
                )));
            }
        }

        for marker in self.known_variants.values() {
            if self.allele_function(&marker.gene, &marker.star).is_none() {
                // Tolerated: the caller reports Unknown for this allele
                debug!(
                    "Marker {} maps to {}{} which has no allele function",
                    marker.rsid, marker.gene, marker.star
                );
            }
        }

        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a drug by (case-insensitive) name
    pub fn drug(&self, name: &str) -> Option<&DrugDefinition> {
        self.drugs.get(&name.trim().to_ascii_uppercase())
    }

    /// Supported drugs in alphabetical order
    pub fn supported_drugs(&self) -> Vec<&str> {
        self.drugs.keys().map(String::as_str).collect()
    }

    /// Genes governing a drug, primary gene first
    pub fn genes_for(&self, drug: &str) -> &[DrugGene] {
        self.drug_genes
            .get(&drug.trim().to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every gene referenced by the drug panel, sorted
    pub fn supported_genes(&self) -> Vec<String> {
        let mut genes: Vec<String> = self
            .drug_genes
            .values()
            .flatten()
            .map(|g| g.gene.clone())
            .collect();
        genes.sort();
        genes.dedup();
        genes
    }

    pub fn known_variant(&self, rsid: &str) -> Option<&KnownVariant> {
        self.known_variants.get(&rsid.to_ascii_lowercase())
    }

    pub fn has_function_table(&self, gene: &str) -> bool {
        self.allele_functions.contains_key(gene)
    }

    pub fn allele_function(&self, gene: &str, star: &str) -> Option<AlleleFunction> {
        self.allele_functions.get(gene)?.get(star).copied()
    }

    /// Phenotype for an unordered function pair; gene rows win over defaults
    pub fn phenotype_for(&self, gene: &str, a: AlleleFunction, b: AlleleFunction) -> Option<Phenotype> {
        self.phenotype_map
            .get(&(gene.to_string(), a, b))
            .or_else(|| self.phenotype_map.get(&(DEFAULT_GENE_KEY.to_string(), a, b)))
            .copied()
    }

    pub fn rule(&self, drug: &str, gene: &str, phenotype: Phenotype) -> Option<&CpicRule> {
        self.rules
            .get(&(drug.to_ascii_uppercase(), gene.to_ascii_uppercase(), phenotype))
    }
}

/// Deserialize every row of a CSV table
fn read_table<T: DeserializeOwned>(table: &'static str, data: &str) -> Result<Vec<T>, KnowledgeBaseError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(data.as_bytes());

    let rows = reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(|source| KnowledgeBaseError::Csv { table, source })?;

    debug!("Loaded {} rows from {} table", rows.len(), table);
    Ok(rows)
}
