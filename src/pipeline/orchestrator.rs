//! Parsing orchestrator — decides per email between the AI classifier and
//! the deterministic fallback, and owns the idempotent upsert.
//!
//! **Core invariant: every parse attempt leaves exactly one ParsedEmail
//! row for the email.** Classifier failures of any kind (network, quota,
//! malformed output, timeout) fall back to the simple parser; they are
//! never surfaced as an unparsed email.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::classifier::{ClassifyRequest, Classification, IntentClassifier};
use crate::config::PipelineConfig;
use crate::error::{ClassifierError, PipelineError};
use crate::model::{
    ExtractedEntities, ParseOutcome, ParsedEmail, ParsingMethod, ProcessingStatus, RawEmail,
};
use crate::pipeline::matcher;
use crate::pipeline::simple::{SimpleParser, extract_lp_guess};
use crate::store::EmailStore;

pub use crate::pipeline::simple::ParseContext;

/// The central parsing coordinator.
///
/// Collaborator handles are injected so tests can substitute both the
/// store and the classifier.
pub struct EmailParser {
    store: Arc<dyn EmailStore>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    simple: SimpleParser,
    config: PipelineConfig,
}

impl EmailParser {
    pub fn new(
        store: Arc<dyn EmailStore>,
        classifier: Option<Arc<dyn IntentClassifier>>,
        config: PipelineConfig,
    ) -> Self {
        let simple = SimpleParser::new(Arc::clone(&store));
        Self {
            store,
            classifier,
            simple,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn EmailStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Parse one email through the full pipeline.
    ///
    /// `context` lets bulk runs fetch candidates once before fan-out;
    /// single-email callers pass `None` and the context is loaded here.
    /// Repeated invocation for the same email id overwrites, never
    /// duplicates.
    pub async fn parse_email(
        &self,
        email: &RawEmail,
        context: Option<&ParseContext>,
    ) -> Result<ParseOutcome, PipelineError> {
        let loaded;
        let context = match context {
            Some(context) => context,
            None => {
                loaded = ParseContext::load(&self.store, &email.org_id, &self.config).await?;
                &loaded
            }
        };

        let Some(classifier) = &self.classifier else {
            return self.simple.parse(email, context).await;
        };

        match self.classify(classifier, email, context).await {
            Ok(classification) => self.persist_ai_result(email, context, classification).await,
            Err(e) => {
                warn!(
                    email_id = %email.id,
                    error = %e,
                    "Classification failed — falling back to simple parser"
                );
                self.simple.parse(email, context).await
            }
        }
    }

    /// Call the classifier under the per-email timeout.
    async fn classify(
        &self,
        classifier: &Arc<dyn IntentClassifier>,
        email: &RawEmail,
        context: &ParseContext,
    ) -> Result<Classification, ClassifierError> {
        let request = build_classify_request(email, context);

        match tokio::time::timeout(self.config.classify_timeout, classifier.classify(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout {
                timeout: self.config.classify_timeout,
            }),
        }
    }

    /// Persist a successful AI classification as the email's ParsedEmail row.
    ///
    /// LP/deal ids come from the deterministic matcher; intent, entities,
    /// and confidences come from the model.
    async fn persist_ai_result(
        &self,
        email: &RawEmail,
        context: &ParseContext,
        classification: Classification,
    ) -> Result<ParseOutcome, PipelineError> {
        let extracted_lp = extract_lp_guess(email);
        let matched_lp = matcher::match_lp(&email.sender_email, &context.lps);
        let matched_deal = matcher::match_deal(&email.search_text(), &context.deals);

        let lp_matched = matched_lp.is_some();
        let detected_lp_id = matched_lp.map(|lp| lp.id.clone());
        let detected_deal_id = matched_deal.map(|deal| deal.id.clone());

        let parsed = ParsedEmail {
            email_id: email.id.clone(),
            org_id: email.org_id.clone(),
            detected_lp_id: detected_lp_id.clone(),
            detected_deal_id: detected_deal_id.clone(),
            intent: Some(classification.intent),
            status: ProcessingStatus::Success,
            method: ParsingMethod::Ai,
            entities: ExtractedEntities {
                lp_guess: Some(extracted_lp.clone()),
                amount_guess: classification.amount,
                questions: classification.questions,
            },
            confidence: classification.confidence,
            is_answered: false,
            parsed_at: Utc::now(),
        };

        self.store.upsert_parsed_email(&parsed).await?;

        if let Some(lp_id) = &detected_lp_id {
            self.store
                .update_lp_last_interaction(lp_id, email.received_at)
                .await?;
        }

        debug!(
            email_id = %email.id,
            intent = classification.intent.as_str(),
            lp_matched,
            "Email parsed (ai)"
        );

        Ok(ParseOutcome {
            detected_lp_id,
            detected_deal_id,
            lp_created: false,
            lp_matched,
            extracted_lp,
            method: ParsingMethod::Ai,
        })
    }
}

/// Assemble the classifier request from the email and fetched candidates.
fn build_classify_request(email: &RawEmail, context: &ParseContext) -> ClassifyRequest {
    let candidate_lps = context
        .lps
        .iter()
        .map(|lp| format!("{} <{}>", lp.name, lp.email))
        .collect();

    let candidate_deals = context
        .deals
        .iter()
        .map(|deal| match &deal.company_name {
            Some(company) => format!("{} ({company})", deal.name),
            None => deal.name.clone(),
        })
        .collect();

    let relationship_context = matcher::match_lp(&email.sender_email, &context.lps).map(|lp| {
        match &lp.firm {
            Some(firm) => format!("{} is a known LP at {firm}.", lp.name),
            None => format!("{} is a known LP.", lp.name),
        }
    });

    ClassifyRequest {
        sender_email: email.sender_email.clone(),
        sender_name: email.sender_name.clone(),
        subject: email.subject.clone(),
        body: email.body_text.clone(),
        candidate_lps,
        candidate_deals,
        relationship_context,
    }
}
