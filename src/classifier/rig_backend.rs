//! rig-core-backed `IntentClassifier`.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core

use std::sync::Arc;

use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::ExposeSecret;

use crate::classifier::{
    ClassifyRequest, Classification, IntentClassifier, build_user_prompt, parse_classification,
    system_prompt,
};
use crate::error::ClassifierError;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f64 = 0.1;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating a classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// An `IntentClassifier` backed by a rig-core agent.
pub struct RigClassifier<M: CompletionModel> {
    agent: Agent<M>,
    provider: &'static str,
}

/// Create a classifier from configuration.
pub fn create_classifier(
    config: &ClassifierConfig,
) -> Result<Arc<dyn IntentClassifier>, ClassifierError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_classifier(config),
        LlmBackend::OpenAi => create_openai_classifier(config),
    }
}

fn create_anthropic_classifier(
    config: &ClassifierConfig,
) -> Result<Arc<dyn IntentClassifier>, ClassifierError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            ClassifierError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {e}"),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(system_prompt())
        .temperature(CLASSIFY_TEMPERATURE)
        .build();

    tracing::info!("Using Anthropic classifier (model: {})", config.model);
    Ok(Arc::new(RigClassifier {
        agent,
        provider: "anthropic",
    }))
}

fn create_openai_classifier(
    config: &ClassifierConfig,
) -> Result<Arc<dyn IntentClassifier>, ClassifierError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            ClassifierError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {e}"),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(system_prompt())
        .temperature(CLASSIFY_TEMPERATURE)
        .build();

    tracing::info!("Using OpenAI classifier (model: {})", config.model);
    Ok(Arc::new(RigClassifier {
        agent,
        provider: "openai",
    }))
}

#[async_trait]
impl<M: CompletionModel> IntentClassifier for RigClassifier<M> {
    async fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> Result<Classification, ClassifierError> {
        let prompt = build_user_prompt(request);

        let raw = self.agent.prompt(prompt).await.map_err(|e| {
            ClassifierError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            }
        })?;

        parse_classification(&raw).map_err(|reason| {
            tracing::warn!(
                provider = self.provider,
                raw_response = %raw,
                "Failed to parse classification response"
            );
            ClassifierError::InvalidResponse {
                provider: self.provider.to_string(),
                reason,
            }
        })
    }
}
