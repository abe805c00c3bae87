// ==============================================================================
// cpic/comparison.rs - Drug Comparison Summaries
// ==============================================================================
// Description: Ranks requested drugs that share a gene or metabolic pathway
// Author: Matt Barham
// Created: 2026-02-05
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================
// Ranking key (lower wins):
//   severity > CPIC evidence level (A, A/B, B, B/C, C, D) > strength > input order
// ==============================================================================

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::DrugEvaluation;
use crate::knowledge_base::KnowledgeBase;
use crate::models::{RecommendationStrength, RiskLabel, Severity};

/// One drug's position within a comparison group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedDrug {
    pub rank: usize,
    pub drug: String,
    pub risk_label: RiskLabel,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation_strength: Option<RecommendationStrength>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugComparisonSummary {
    pub reasoning: String,
    pub recommended_first_line: String,
    /// Drug names, safest first
    pub ranked_drugs: Vec<String>,
    pub ranking: Vec<RankedDrug>,
}

fn evidence_rank(level: Option<&str>) -> u8 {
    match level.map(str::trim) {
        Some("A") => 0,
        Some("A/B") => 1,
        Some("B") => 2,
        Some("B/C") => 3,
        Some("C") => 4,
        Some("D") => 5,
        _ => 6,
    }
}

fn strength_rank(strength: Option<RecommendationStrength>) -> u8 {
    match strength {
        Some(RecommendationStrength::Strong) => 0,
        Some(RecommendationStrength::Moderate) => 1,
        Some(RecommendationStrength::Optional) => 2,
        None => 3,
    }
}

/// Build comparison summaries for a batch
///
/// Returns one entry per evaluation, aligned by index. Drugs are comparable
/// when they share a gene or a pathway; every connected group of two or more
/// supported drugs receives the same summary.
pub fn compare_drugs(kb: &KnowledgeBase, evaluations: &[DrugEvaluation]) -> Vec<Option<DrugComparisonSummary>> {
    let mut summaries = vec![None; evaluations.len()];

    let genes: Vec<BTreeSet<&str>> = evaluations
        .iter()
        .map(|e| kb.genes_for(&e.drug).iter().map(|g| g.gene.as_str()).collect())
        .collect();

    let comparable = |i: usize, j: usize| -> bool {
        let (a, b) = (&evaluations[i], &evaluations[j]);
        if !a.supported || !b.supported {
            return false;
        }
        let shared_pathway = a.pathway.is_some() && a.pathway == b.pathway;
        shared_pathway || !genes[i].is_disjoint(&genes[j])
    };

    let mut group_of: Vec<Option<usize>> = vec![None; evaluations.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for start in 0..evaluations.len() {
        if group_of[start].is_some() || !evaluations[start].supported {
            continue;
        }

        let id = groups.len();
        let mut members = vec![start];
        group_of[start] = Some(id);
        let mut cursor = 0;
        while cursor < members.len() {
            let current = members[cursor];
            for other in 0..evaluations.len() {
                if group_of[other].is_none() && comparable(current, other) {
                    group_of[other] = Some(id);
                    members.push(other);
                }
            }
            cursor += 1;
        }
        members.sort_unstable();
        groups.push(members);
    }

    for members in groups.into_iter().filter(|m| m.len() >= 2) {
        let summary = summarize(evaluations, &genes, &members);
        for idx in members {
            summaries[idx] = Some(summary.clone());
        }
    }

    summaries
}

fn summarize(evaluations: &[DrugEvaluation], genes: &[BTreeSet<&str>], members: &[usize]) -> DrugComparisonSummary {
    let mut ordered = members.to_vec();
    ordered.sort_by_key(|&idx| {
        let e = &evaluations[idx];
        (
            e.risk_assessment.severity,
            evidence_rank(e.recommendation.evidence_level.as_deref()),
            strength_rank(e.recommendation.recommendation_strength),
            idx,
        )
    });

    let ranking: Vec<RankedDrug> = ordered
        .iter()
        .enumerate()
        .map(|(pos, &idx)| {
            let e = &evaluations[idx];
            RankedDrug {
                rank: pos + 1,
                drug: e.drug.clone(),
                risk_label: e.risk_assessment.risk_label,
                severity: e.risk_assessment.severity,
                evidence_level: e.recommendation.evidence_level.clone(),
                recommendation_strength: e.recommendation.recommendation_strength,
            }
        })
        .collect();

    // Genes and pathways carried by more than one member
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for &idx in members {
        for gene in &genes[idx] {
            *counts.entry((*gene).to_string()).or_default() += 1;
        }
        if let Some(pathway) = &evaluations[idx].pathway {
            *counts.entry(format!("{} pathway", pathway)).or_default() += 1;
        }
    }
    let shared: Vec<String> = counts.into_iter().filter(|(_, n)| *n > 1).map(|(k, _)| k).collect();

    let ranked_drugs: Vec<String> = ranking.iter().map(|r| r.drug.clone()).collect();
    let first = &ranking[0];
    let reasoning = format!(
        "Drugs sharing {} ranked from safest to highest risk by pharmacogenomic severity, then CPIC evidence level, then recommendation strength: {}. Recommended first-line: {} ({}, severity {}) due to the lowest risk profile.",
        shared.join(", "),
        ranked_drugs.join(", "),
        first.drug,
        first.risk_label,
        first.severity
    );

    DrugComparisonSummary {
        reasoning,
        recommended_first_line: first.drug.clone(),
        ranked_drugs,
        ranking,
    }
}
