// ==============================================================================
// state.rs - Application State Management
// ==============================================================================
// Description: Shared application state for the PGx API gateway
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-02-09
// Version: 2.0.0
// ==============================================================================

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use pgx_processor::{
    ExplanationBridge, ExplanationConfig, KnowledgeBase, PgxProcessor, PrecedencePolicy,
};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Analysis pipeline (read-only between requests)
    processor: PgxProcessor,

    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(processor: PgxProcessor) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                processor,
                started_at: Utc::now(),
            }),
        }
    }

    /// Create application state from environment
    pub fn from_env() -> Result<Self> {
        // Knowledge base: directory override or the embedded tables
        let kb = match std::env::var("PGX_KNOWLEDGE_BASE_DIR") {
            Ok(dir) => KnowledgeBase::from_dir(&dir)
                .with_context(|| format!("Failed to load knowledge base from {}", dir))?,
            Err(_) => KnowledgeBase::embedded().context("Embedded knowledge base is invalid")?,
        };
        info!(
            "Knowledge base {} loaded: {} drug(s)",
            kb.version(),
            kb.supported_drugs().len()
        );

        let precedence = match std::env::var("PGX_PRECEDENCE_POLICY") {
            Ok(raw) => raw
                .parse::<PrecedencePolicy>()
                .map_err(|e| anyhow!(e))
                .context("Invalid PGX_PRECEDENCE_POLICY")?,
            Err(_) => PrecedencePolicy::default(),
        };

        let config = ExplanationConfig::from_env().context("Invalid explanation service configuration")?;
        let bridge = ExplanationBridge::from_config(config).context("Failed to build explanation client")?;

        let processor = PgxProcessor::new(Arc::new(kb), bridge).with_precedence(precedence);
        Ok(Self::new(processor))
    }

    pub fn processor(&self) -> &PgxProcessor {
        &self.inner.processor
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        self.inner.processor.knowledge_base()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// State over the embedded knowledge base with template explanations
    #[cfg(test)]
    pub fn mock() -> Self {
        let kb = KnowledgeBase::embedded().expect("embedded knowledge base");
        Self::new(PgxProcessor::new(Arc::new(kb), ExplanationBridge::disabled()))
    }
}
