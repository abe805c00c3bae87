// ==============================================================================
// explanation/chat_client.rs - Chat-Completions Explanation Client
// ==============================================================================
// Description: OpenAI-compatible chat-completions client (Groq by default)
//              that turns explanation facts into a four-field JSON answer
// Author: Matt Barham
// Created: 2026-02-05
// Modified: 2026-02-09
// Version: 1.0.0
// ==============================================================================
// Environment:
//   GROQ_API_KEY / GROQ_API_KEY_FILE  API key (file wins when both are set)
//   PGX_LLM_BASE_URL                  default https://api.groq.com/openai/v1
//   PGX_LLM_MODEL                     default llama-3.3-70b-versatile
//   PGX_LLM_TIMEOUT_SECS              default 30
//   PGX_LLM_MAX_ATTEMPTS              default 2
// ==============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

use super::{ExplanationError, ExplanationFacts, ExplanationService, StructuredExplanation};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Explanation service configuration
pub struct ExplanationConfig {
    api_key: Option<Zeroizing<String>>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            temperature: 0.1,
            max_tokens: 500,
        }
    }
}

impl std::fmt::Debug for ExplanationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplanationConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl ExplanationConfig {
    /// Load configuration from environment variables
    ///
    /// A missing API key is not an error: the bridge then uses templates.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            api_key: Self::read_api_key()?,
            ..Self::default()
        };

        if let Ok(url) = std::env::var("PGX_LLM_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("PGX_LLM_MODEL") {
            config.model = model;
        }
        if let Ok(secs) = std::env::var("PGX_LLM_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .context("PGX_LLM_TIMEOUT_SECS must be a whole number of seconds")?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(attempts) = std::env::var("PGX_LLM_MAX_ATTEMPTS") {
            config.max_attempts = attempts
                .parse()
                .context("PGX_LLM_MAX_ATTEMPTS must be a positive integer")?;
        }

        Ok(config)
    }

    /// Read the API key from the secret file, falling back to the variable
    fn read_api_key() -> Result<Option<Zeroizing<String>>> {
        if let Ok(key_file) = std::env::var("GROQ_API_KEY_FILE") {
            let key = fs::read_to_string(&key_file)
                .with_context(|| format!("Failed to read API key from {}", key_file))?;
            return Ok(Some(Zeroizing::new(key.trim().to_string())).filter(|k| !k.is_empty()));
        }

        Ok(std::env::var("GROQ_API_KEY")
            .ok()
            .map(|k| Zeroizing::new(k.trim().to_string()))
            .filter(|k| !k.is_empty()))
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(Zeroizing::new(key.into()));
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions client implementing `ExplanationService`
pub struct ChatCompletionClient {
    client: Client,
    config: ExplanationConfig,
}

impl ChatCompletionClient {
    pub fn new(config: ExplanationConfig) -> Result<Self, ExplanationError> {
        if !config.is_configured() {
            return Err(ExplanationError::NotConfigured);
        }

        // The bridge enforces its own per-attempt timeout; this one bounds the socket
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

#[async_trait]
impl ExplanationService for ChatCompletionClient {
    async fn explain(&self, facts: &ExplanationFacts) -> Result<StructuredExplanation, ExplanationError> {
        let api_key = self.config.api_key.as_ref().ok_or(ExplanationError::NotConfigured)?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: build_prompt(facts)?,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key.as_str())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExplanationError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ExplanationError::Malformed("response has no choices".to_string()))?;

        debug!("Received {} characters of explanation for {}", content.len(), facts.drug);
        parse_structured(&content)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// Prompt with the generator's constraints and the facts as JSON
pub fn build_prompt(facts: &ExplanationFacts) -> Result<String, ExplanationError> {
    let context = serde_json::to_string_pretty(facts)
        .map_err(|e| ExplanationError::Malformed(format!("cannot encode facts: {}", e)))?;

    Ok(format!(
        r#"You are a pharmacogenomics clinical explanation generator.

IMPORTANT RULES:
- Do NOT infer genotype.
- Do NOT assign phenotype.
- Do NOT change the risk label or severity.
- Use ONLY the structured data provided.
- Return a JSON object with exactly these keys:
  "genetic_finding": the detected variant(s) in clear terms,
  "biological_mechanism": how the result affects the drug's metabolism or action,
  "clinical_impact": the practical effect on treatment,
  "recommended_action": clear, actionable advice consistent with the recommendation.

Return ONLY valid JSON, no extra text.

Context:
{}"#,
        context
    ))
}

/// Remove a surrounding markdown code fence (``` or ```json)
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse a model answer into the four explanation fields
pub fn parse_structured(text: &str) -> Result<StructuredExplanation, ExplanationError> {
    let structured: StructuredExplanation = serde_json::from_str(strip_code_fences(text))
        .map_err(|e| ExplanationError::Malformed(e.to_string()))?;

    let fields = [
        &structured.genetic_finding,
        &structured.biological_mechanism,
        &structured.clinical_impact,
        &structured.recommended_action,
    ];
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(ExplanationError::Malformed("empty explanation field".to_string()));
    }

    Ok(structured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Phenotype, RiskLabel, Severity};

    const ANSWER: &str = r#"{"genetic_finding":"g","biological_mechanism":"b","clinical_impact":"c","recommended_action":"r"}"#;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences(&format!("```json\n{}\n```", ANSWER)), ANSWER);
        assert_eq!(strip_code_fences(&format!("```\n{}\n```", ANSWER)), ANSWER);
        assert_eq!(strip_code_fences(&format!("  {}  ", ANSWER)), ANSWER);
    }

    #[test]
    fn test_parse_structured() {
        let parsed = parse_structured(&format!("```json\n{}\n```", ANSWER)).unwrap();
        assert_eq!(parsed.genetic_finding, "g");
        assert_eq!(parsed.recommended_action, "r");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_structured("not json"), Err(ExplanationError::Malformed(_))));
        assert!(matches!(
            parse_structured(r#"{"genetic_finding":"g","biological_mechanism":"b","clinical_impact":"c"}"#),
            Err(ExplanationError::Malformed(_))
        ));
        assert!(matches!(
            parse_structured(r#"{"genetic_finding":"","biological_mechanism":"b","clinical_impact":"c","recommended_action":"r"}"#),
            Err(ExplanationError::Malformed(_))
        ));
    }

    #[test]
    fn test_prompt_contains_facts_and_rules() {
        let facts = ExplanationFacts {
            drug: "CODEINE".to_string(),
            supported: true,
            gene: Some("CYP2D6".to_string()),
            diplotype: Some("*4/*4".to_string()),
            phenotype: Phenotype::Poor,
            phenotype_description: Phenotype::Poor.description().to_string(),
            detected_variants: Vec::new(),
            risk_label: RiskLabel::Ineffective,
            severity: Severity::High,
            recommendation: "Avoid codeine".to_string(),
            alternative_drug: None,
        };

        let prompt = build_prompt(&facts).unwrap();
        assert!(prompt.contains("Do NOT infer genotype"));
        assert!(prompt.contains("\"risk_label\": \"Ineffective\""));
        assert!(prompt.contains("*4/*4"));
    }

    #[test]
    fn test_client_requires_api_key() {
        assert!(matches!(
            ChatCompletionClient::new(ExplanationConfig::default()),
            Err(ExplanationError::NotConfigured)
        ));
        assert!(ChatCompletionClient::new(ExplanationConfig::default().with_api_key("test-key")).is_ok());
    }
}
