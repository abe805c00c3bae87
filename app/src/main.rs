// ==============================================================================
// main.rs - PGx Processor Entry Point
// ==============================================================================
// Description: Command-line analysis of one VCF against a list of drugs
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-02-09
// Version: 2.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgx_processor::{
    AnalysisRequest, ExplanationBridge, ExplanationConfig, KnowledgeBase, PgxProcessor, PrecedencePolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// VCF file to analyse (plain or gzip-compressed)
    #[arg(short, long)]
    vcf: PathBuf,

    /// Drugs to evaluate (comma-separated or repeated)
    #[arg(short, long, required = true, num_args = 1..)]
    drugs: Vec<String>,

    /// Patient identifier (defaults to the first VCF sample name)
    #[arg(short, long)]
    patient_id: Option<String>,

    /// Directory of knowledge-base CSV tables overriding the embedded set
    #[arg(long, env = "PGX_KNOWLEDGE_BASE_DIR")]
    knowledge_base_dir: Option<PathBuf>,

    /// Write the JSON reports here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Gene precedence for multi-gene drugs (most_severe or primary_gene)
    #[arg(long, env = "PGX_PRECEDENCE_POLICY", default_value = "most_severe")]
    precedence: PrecedencePolicy,

    /// Use template explanations only
    #[arg(long)]
    no_explanations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (stderr, so stdout stays clean JSON)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgx_processor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    info!("PGx Processor starting...");

    let kb = match &args.knowledge_base_dir {
        Some(dir) => KnowledgeBase::from_dir(dir)
            .with_context(|| format!("Failed to load knowledge base from {}", dir.display()))?,
        None => KnowledgeBase::embedded().context("Embedded knowledge base is invalid")?,
    };
    info!(
        "Knowledge base {} loaded: {} drug(s)",
        kb.version(),
        kb.supported_drugs().len()
    );

    let bridge = if args.no_explanations {
        info!("Explanations disabled, using templates");
        ExplanationBridge::disabled()
    } else {
        let config = ExplanationConfig::from_env().context("Invalid explanation service configuration")?;
        ExplanationBridge::from_config(config).context("Failed to build explanation client")?
    };

    let processor = PgxProcessor::new(Arc::new(kb), bridge).with_precedence(args.precedence);

    let file_bytes = tokio::fs::read(&args.vcf)
        .await
        .with_context(|| format!("Failed to read {}", args.vcf.display()))?;

    let request = AnalysisRequest {
        file_name: args
            .vcf
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        file_bytes,
        drugs: args.drugs,
        patient_id: args.patient_id,
    };

    let reports = processor.analyze(request).await.context("Analysis request rejected")?;
    let json = serde_json::to_string_pretty(&reports).context("Failed to serialize reports")?;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} report(s) to {}", reports.len(), path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
