//! Intent classification — the AI-backed seam of the pipeline.
//!
//! The pipeline consumes `IntentClassifier` as a fallible remote capability.
//! Any failure (network, quota, malformed output, timeout) is recovered by
//! the orchestrator's deterministic fallback, never surfaced as a pipeline
//! failure.

pub mod rig_backend;

pub use rig_backend::{ClassifierConfig, LlmBackend, RigClassifier, create_classifier};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ClassifierError;
use crate::model::{ConfidenceScores, Intent};

// ── Contract ────────────────────────────────────────────────────────

/// Input to one classification call.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    /// Known LP candidates, formatted "Name <email>".
    pub candidate_lps: Vec<String>,
    /// Open deal candidates, formatted "Name (Company)".
    pub candidate_deals: Vec<String>,
    /// Prior relationship notes (special fee/carry terms and the like).
    pub relationship_context: Option<String>,
}

/// Structured result of a classification call.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    pub amount: Option<Decimal>,
    pub questions: Vec<String>,
    pub confidence: ConfidenceScores,
}

/// A remote intent classifier. Treated as fallible; callers must have a
/// deterministic fallback.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify one email. Errors trigger fallback parsing upstream.
    async fn classify(&self, request: &ClassifyRequest)
        -> Result<Classification, ClassifierError>;
}

// ── Prompt construction ─────────────────────────────────────────────

/// Max body characters sent to the model (token budget; runs per email).
const BODY_PREVIEW_CHARS: usize = 2000;

pub(crate) fn system_prompt() -> &'static str {
    "You classify inbound investor (LP) emails for a fund manager. \
     Decide the sender's intent toward the fundraise:\n\
     - \"interested\": expresses interest, wants materials or a call\n\
     - \"committed\": commits capital, states a commitment amount\n\
     - \"declined\": passes on the opportunity\n\
     - \"question\": asks one or more questions needing an answer\n\
     - \"neutral\": none of the above\n\n\
     Respond with ONLY a JSON object:\n\
     {\"intent\": \"...\", \"amount\": 500000, \"questions\": [\"...\"], \
     \"confidence\": {\"lp\": 0.0, \"deal\": 0.0, \"intent\": 0.0, \"amount\": 0.0}}\n\n\
     Rules:\n\
     - \"amount\" is the committed dollar amount, omit when none is stated\n\
     - \"questions\" lists extracted questions verbatim, empty unless intent is \"question\"\n\
     - Confidence values are floats in [0, 1]\n\
     - When unsure between two intents, choose the weaker one"
}

pub(crate) fn build_user_prompt(request: &ClassifyRequest) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str(&format!("From: {}", request.sender_email));
    if let Some(ref name) = request.sender_name {
        prompt.push_str(&format!(" ({name})"));
    }
    prompt.push('\n');

    if let Some(ref subject) = request.subject {
        prompt.push_str(&format!("Subject: {subject}\n"));
    }

    if !request.candidate_lps.is_empty() {
        prompt.push_str("\nKnown LPs:\n");
        for lp in &request.candidate_lps {
            prompt.push_str(&format!("  - {lp}\n"));
        }
    }

    if !request.candidate_deals.is_empty() {
        prompt.push_str("\nOpen deals:\n");
        for deal in &request.candidate_deals {
            prompt.push_str(&format!("  - {deal}\n"));
        }
    }

    if let Some(ref context) = request.relationship_context {
        prompt.push_str(&format!("\nRelationship context:\n{context}\n"));
    }

    let body_preview: String = request.body.chars().take(BODY_PREVIEW_CHARS).collect();
    prompt.push_str(&format!("\nEmail:\n{body_preview}"));

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Raw model response structure.
#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    intent: String,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    confidence: RawConfidence,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfidence {
    #[serde(default)]
    lp: f32,
    #[serde(default)]
    deal: f32,
    #[serde(default)]
    intent: f32,
    #[serde(default)]
    amount: f32,
}

/// Parse the model response into a `Classification`.
///
/// Unknown intent labels are a parse error so the caller falls back to the
/// deterministic parser rather than storing a bad label.
pub(crate) fn parse_classification(raw: &str) -> Result<Classification, String> {
    let json_str = extract_json_object(raw);
    let response: ClassificationResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let intent = Intent::parse(&response.intent)
        .ok_or_else(|| format!("unknown intent label: '{}'", response.intent))?;

    let amount = response.amount.as_ref().and_then(parse_amount);

    Ok(Classification {
        intent,
        amount,
        questions: response.questions,
        confidence: ConfidenceScores {
            lp: response.confidence.lp,
            deal: response.confidence.deal,
            intent: response.confidence.intent,
            amount: response.confidence.amount,
        }
        .clamped(),
    })
}

/// Accept amounts as JSON numbers or formatted strings ("$500,000").
fn parse_amount(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        serde_json::Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
