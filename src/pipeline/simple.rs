//! Deterministic fallback parser.
//!
//! Produces a complete ParsedEmail row using only string operations — no
//! network call, hence always available and fast. Used when the AI
//! classifier is unconfigured or fails, and for cheap bulk backfills.
//! It makes no intent judgment: intent is always `neutral`.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{
    ConfidenceScores, Deal, DealStatus, ExtractedEntities, Intent, LpContact, LpGuess,
    ParseOutcome, ParsedEmail, ParsingMethod, ProcessingStatus, RawEmail,
};
use crate::pipeline::matcher;
use crate::store::EmailStore;

/// Consumer mail providers whose domains are never treated as a firm name.
const CONSUMER_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
    "aol.com",
    "mail.com",
    "protonmail.com",
    "live.com",
    "msn.com",
];

/// Candidate lists fetched once per organization.
///
/// Bulk runs load this before fan-out so each email doesn't refetch.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub lps: Vec<LpContact>,
    pub deals: Vec<Deal>,
}

impl ParseContext {
    /// Fetch LP and open-deal candidates for an organization.
    pub async fn load(
        store: &Arc<dyn EmailStore>,
        org_id: &str,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let lps = store.get_lp_contacts(org_id, config.lp_fetch_limit).await?;
        let deals = store
            .get_deals(
                org_id,
                &[DealStatus::Draft, DealStatus::Active],
                config.deal_fetch_limit,
            )
            .await?;
        Ok(Self { lps, deals })
    }
}

/// Regex/string-matching classifier with fixed confidence constants.
pub struct SimpleParser {
    store: Arc<dyn EmailStore>,
}

impl SimpleParser {
    pub fn new(store: Arc<dyn EmailStore>) -> Self {
        Self { store }
    }

    /// Parse one email deterministically and upsert its ParsedEmail row.
    ///
    /// Re-running replaces the previous row; it never accumulates.
    pub async fn parse(
        &self,
        email: &RawEmail,
        context: &ParseContext,
    ) -> Result<ParseOutcome, PipelineError> {
        let extracted_lp = extract_lp_guess(email);

        let matched_lp = matcher::match_lp(&email.sender_email, &context.lps);
        let matched_deal = matcher::match_deal(&email.search_text(), &context.deals);

        let lp_matched = matched_lp.is_some();
        let detected_lp_id = matched_lp.map(|lp| lp.id.clone());
        let detected_deal_id = matched_deal.map(|deal| deal.id.clone());

        // Fixed constants — this parser does not truly assess confidence.
        let confidence = ConfidenceScores {
            lp: if lp_matched { 1.0 } else { 0.5 },
            deal: if detected_deal_id.is_some() { 0.8 } else { 0.0 },
            intent: 0.0,
            amount: 0.0,
        };

        let parsed = ParsedEmail {
            email_id: email.id.clone(),
            org_id: email.org_id.clone(),
            detected_lp_id: detected_lp_id.clone(),
            detected_deal_id: detected_deal_id.clone(),
            intent: Some(Intent::Neutral),
            status: ProcessingStatus::Success,
            method: ParsingMethod::SimpleRegexV1,
            entities: ExtractedEntities {
                lp_guess: Some(extracted_lp.clone()),
                amount_guess: None,
                questions: Vec::new(),
            },
            confidence,
            is_answered: false,
            parsed_at: Utc::now(),
        };

        self.store.upsert_parsed_email(&parsed).await?;

        if let Some(lp_id) = &detected_lp_id {
            // Unconditional overwrite with the email's received time; see
            // DESIGN.md for the out-of-order reparse question.
            self.store
                .update_lp_last_interaction(lp_id, email.received_at)
                .await?;
        }

        debug!(
            email_id = %email.id,
            lp_matched,
            deal_matched = detected_deal_id.is_some(),
            "Email parsed (simple)"
        );

        Ok(ParseOutcome {
            detected_lp_id,
            detected_deal_id,
            lp_created: false,
            lp_matched,
            extracted_lp,
            method: ParsingMethod::SimpleRegexV1,
        })
    }
}

/// Provisional LP identity from the sender headers.
///
/// Name falls back to the address local-part; the firm is guessed from the
/// sender's domain unless it's a consumer mail provider.
pub(crate) fn extract_lp_guess(email: &RawEmail) -> LpGuess {
    let address = email.sender_email.trim().to_lowercase();
    let (local_part, domain) = address.split_once('@').unwrap_or((address.as_str(), ""));

    let name = email
        .sender_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .unwrap_or_else(|| local_part.to_string());

    let firm = if !domain.is_empty() && !CONSUMER_DOMAINS.contains(&domain) {
        domain.split('.').next().map(capitalize)
    } else {
        None
    };

    LpGuess {
        name,
        email: address.clone(),
        firm,
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use chrono::{TimeZone, Utc};

    fn email(sender: &str, name: Option<&str>, subject: Option<&str>, body: &str) -> RawEmail {
        RawEmail {
            id: "email-1".into(),
            org_id: "org-1".into(),
            account_id: "acct-1".into(),
            provider_message_id: "prov-1".into(),
            thread_id: None,
            sender_email: sender.into(),
            sender_name: name.map(String::from),
            to: vec![],
            cc: vec![],
            subject: subject.map(String::from),
            body_text: body.into(),
            body_html: None,
            received_at: Utc::now(),
            has_attachments: false,
        }
    }

    async fn store_with_jane_and_falcon() -> Arc<dyn EmailStore> {
        let store: Arc<dyn EmailStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .insert_lp_contact(&LpContact {
                id: "lp-jane".into(),
                org_id: "org-1".into(),
                name: "Jane Doe".into(),
                email: "jane@acmecap.com".into(),
                firm: Some("Acme Capital".into()),
                last_interaction_at: None,
            })
            .await
            .unwrap();
        store
            .insert_deal(&Deal {
                id: "deal-falcon".into(),
                org_id: "org-1".into(),
                name: "Project Falcon".into(),
                company_name: None,
                status: DealStatus::Active,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn lp_guess_prefers_display_name() {
        let guess = extract_lp_guess(&email(
            "jane@acmecap.com",
            Some("Jane Doe"),
            None,
            "hi",
        ));
        assert_eq!(guess.name, "Jane Doe");
        assert_eq!(guess.email, "jane@acmecap.com");
        assert_eq!(guess.firm.as_deref(), Some("Acmecap"));
    }

    #[test]
    fn lp_guess_falls_back_to_local_part() {
        let guess = extract_lp_guess(&email("x@unknownvc.com", None, None, "hi"));
        assert_eq!(guess.name, "x");
        assert_eq!(guess.firm.as_deref(), Some("Unknownvc"));
    }

    #[test]
    fn lp_guess_skips_consumer_domains() {
        for domain in ["gmail.com", "yahoo.com", "protonmail.com", "msn.com"] {
            let guess = extract_lp_guess(&email(&format!("a@{domain}"), None, None, "hi"));
            assert!(guess.firm.is_none(), "firm guessed for {domain}");
        }
    }

    #[tokio::test]
    async fn end_to_end_jane_commits_to_falcon() {
        let store = store_with_jane_and_falcon().await;
        let parser = SimpleParser::new(Arc::clone(&store));
        let context = ParseContext::load(&store, "org-1", &PipelineConfig::default())
            .await
            .unwrap();

        let msg = email(
            "jane@acmecap.com",
            Some("Jane Doe"),
            Some("Re: Series A deal"),
            "We'd like to commit $500k to the Project Falcon round",
        );
        let outcome = parser.parse(&msg, &context).await.unwrap();

        assert_eq!(outcome.detected_lp_id.as_deref(), Some("lp-jane"));
        assert_eq!(outcome.detected_deal_id.as_deref(), Some("deal-falcon"));
        assert!(outcome.lp_matched);
        assert!(!outcome.lp_created);

        let row = store.get_parsed_email("email-1").await.unwrap().unwrap();
        assert_eq!(row.intent, Some(Intent::Neutral));
        assert_eq!(row.status, ProcessingStatus::Success);
        assert_eq!(row.method, ParsingMethod::SimpleRegexV1);
        assert_eq!(row.confidence.lp, 1.0);
        assert_eq!(row.confidence.deal, 0.8);
        assert_eq!(row.confidence.intent, 0.0);
        assert_eq!(row.confidence.amount, 0.0);
    }

    #[tokio::test]
    async fn unknown_sender_yields_guess_only() {
        let store = store_with_jane_and_falcon().await;
        let parser = SimpleParser::new(Arc::clone(&store));
        let context = ParseContext::load(&store, "org-1", &PipelineConfig::default())
            .await
            .unwrap();

        let msg = email("x@unknownvc.com", None, Some("Intro"), "Hello there");
        let outcome = parser.parse(&msg, &context).await.unwrap();

        assert!(outcome.detected_lp_id.is_none());
        assert!(!outcome.lp_matched);
        assert_eq!(outcome.extracted_lp.firm.as_deref(), Some("Unknownvc"));

        let row = store.get_parsed_email("email-1").await.unwrap().unwrap();
        assert_eq!(row.confidence.lp, 0.5);
        assert_eq!(row.confidence.deal, 0.0);
    }

    #[tokio::test]
    async fn reparse_overwrites_single_row() {
        let store = store_with_jane_and_falcon().await;
        let parser = SimpleParser::new(Arc::clone(&store));
        let context = ParseContext::load(&store, "org-1", &PipelineConfig::default())
            .await
            .unwrap();

        let first = email("jane@acmecap.com", None, None, "no deal mentioned");
        parser.parse(&first, &context).await.unwrap();
        let row = store.get_parsed_email("email-1").await.unwrap().unwrap();
        assert!(row.detected_deal_id.is_none());

        // Same email id, now mentioning the deal — the row is replaced
        let second = email("jane@acmecap.com", None, None, "about Project Falcon");
        parser.parse(&second, &context).await.unwrap();
        let row = store.get_parsed_email("email-1").await.unwrap().unwrap();
        assert_eq!(row.detected_deal_id.as_deref(), Some("deal-falcon"));
    }

    #[tokio::test]
    async fn lp_match_bumps_last_interaction() {
        let store = store_with_jane_and_falcon().await;
        let parser = SimpleParser::new(Arc::clone(&store));
        let context = ParseContext::load(&store, "org-1", &PipelineConfig::default())
            .await
            .unwrap();

        let received = Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap();
        let mut msg = email("jane@acmecap.com", None, None, "hello");
        msg.received_at = received;
        parser.parse(&msg, &context).await.unwrap();

        let lps = store.get_lp_contacts("org-1", 500).await.unwrap();
        assert_eq!(lps[0].last_interaction_at, Some(received));
    }

    #[tokio::test]
    async fn no_lp_match_leaves_timestamp_untouched() {
        let store = store_with_jane_and_falcon().await;
        let parser = SimpleParser::new(Arc::clone(&store));
        let context = ParseContext::load(&store, "org-1", &PipelineConfig::default())
            .await
            .unwrap();

        parser
            .parse(&email("x@unknownvc.com", None, None, "hi"), &context)
            .await
            .unwrap();

        let lps = store.get_lp_contacts("org-1", 500).await.unwrap();
        assert!(lps[0].last_interaction_at.is_none());
    }
}
