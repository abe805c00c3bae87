// ==============================================================================
// lib.rs - PGx Processor Library
// ==============================================================================
// Description: Library interface for the pharmacogenomic analysis pipeline
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-02-09
// Version: 2.0.0
// ==============================================================================

pub mod parsers;
pub mod audit;
pub mod validator;
pub mod models;
pub mod knowledge_base;
pub mod allele_resolver;
pub mod phenotype;
pub mod cpic;
pub mod quality;
pub mod explanation;
pub mod report;
pub mod processor;

pub use cpic::{ConfidencePolicy, PrecedencePolicy};
pub use explanation::{ExplanationBridge, ExplanationConfig};
pub use knowledge_base::KnowledgeBase;
pub use processor::{AnalysisRequest, PgxProcessor};
pub use report::AnalysisReport;
pub use validator::InputError;
