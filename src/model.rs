//! Domain types shared across the pipeline and storage layers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Enums ───────────────────────────────────────────────────────────

/// Classified purpose of an inbound email relative to a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Interested,
    Committed,
    Declined,
    Question,
    Neutral,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interested => "interested",
            Self::Committed => "committed",
            Self::Declined => "declined",
            Self::Question => "question",
            Self::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "interested" => Some(Self::Interested),
            "committed" => Some(Self::Committed),
            "declined" => Some(Self::Declined),
            "question" => Some(Self::Question),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Which classifier produced a ParsedEmail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParsingMethod {
    #[serde(rename = "ai")]
    Ai,
    #[serde(rename = "simple-regex-v1")]
    SimpleRegexV1,
}

impl ParsingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::SimpleRegexV1 => "simple-regex-v1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(Self::Ai),
            "simple-regex-v1" => Some(Self::SimpleRegexV1),
            _ => None,
        }
    }
}

/// Outcome of one parsing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Lifecycle status of a fundraising deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    Draft,
    Active,
    Closed,
    Cancelled,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Only draft and active deals participate in matching.
    pub fn is_matchable(&self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// Immutable record of an ingested message. Owned by the ingestion
/// process; the pipeline only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEmail {
    pub id: String,
    pub org_id: String,
    /// Connected mailbox account the message arrived through.
    pub account_id: String,
    pub provider_message_id: String,
    /// Not all providers guarantee a thread id.
    pub thread_id: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub body_text: String,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
    pub has_attachments: bool,
}

impl RawEmail {
    /// Subject + body concatenation used for deal matching.
    pub fn search_text(&self) -> String {
        match &self.subject {
            Some(subject) => format!("{subject}\n{}", self.body_text),
            None => self.body_text.clone(),
        }
    }
}

/// Derived record, one per RawEmail, keyed by email id.
///
/// Re-parsing overwrites this row; it is never duplicated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedEmail {
    pub email_id: String,
    pub org_id: String,
    pub detected_lp_id: Option<String>,
    pub detected_deal_id: Option<String>,
    /// `None` means "not yet classified".
    pub intent: Option<Intent>,
    pub status: ProcessingStatus,
    pub method: ParsingMethod,
    pub entities: ExtractedEntities,
    pub confidence: ConfidenceScores,
    /// Meaningful only when intent is `question`.
    pub is_answered: bool,
    pub parsed_at: DateTime<Utc>,
}

/// Structured payload extracted from the email body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub lp_guess: Option<LpGuess>,
    pub amount_guess: Option<Decimal>,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Provisional LP identity derived from email headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LpGuess {
    pub name: String,
    pub email: String,
    pub firm: Option<String>,
}

/// Per-field confidence in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScores {
    pub lp: f32,
    pub deal: f32,
    pub intent: f32,
    pub amount: f32,
}

impl ConfidenceScores {
    pub fn clamped(self) -> Self {
        Self {
            lp: self.lp.clamp(0.0, 1.0),
            deal: self.deal.clamp(0.0, 1.0),
            intent: self.intent.clamp(0.0, 1.0),
            amount: self.amount.clamp(0.0, 1.0),
        }
    }
}

/// A known limited partner contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpContact {
    pub id: String,
    pub org_id: String,
    pub name: String,
    /// Unique within an organization.
    pub email: String,
    pub firm: Option<String>,
    pub last_interaction_at: Option<DateTime<Utc>>,
}

/// A fundraising campaign. The pipeline never mutates deal records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub company_name: Option<String>,
    pub status: DealStatus,
}

/// What one parsing invocation resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub detected_lp_id: Option<String>,
    pub detected_deal_id: Option<String>,
    /// Always false — LP auto-creation is a higher-level flow.
    pub lp_created: bool,
    pub lp_matched: bool,
    pub extracted_lp: LpGuess,
    pub method: ParsingMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_string_round_trip() {
        for intent in [
            Intent::Interested,
            Intent::Committed,
            Intent::Declined,
            Intent::Question,
            Intent::Neutral,
        ] {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(Intent::parse("bogus"), None);
    }

    #[test]
    fn parsing_method_wire_names() {
        assert_eq!(ParsingMethod::Ai.as_str(), "ai");
        assert_eq!(ParsingMethod::SimpleRegexV1.as_str(), "simple-regex-v1");
        assert_eq!(
            ParsingMethod::parse("simple-regex-v1"),
            Some(ParsingMethod::SimpleRegexV1)
        );
    }

    #[test]
    fn only_draft_and_active_are_matchable() {
        assert!(DealStatus::Draft.is_matchable());
        assert!(DealStatus::Active.is_matchable());
        assert!(!DealStatus::Closed.is_matchable());
        assert!(!DealStatus::Cancelled.is_matchable());
    }

    #[test]
    fn search_text_concatenates_subject_and_body() {
        let email = sample_email(Some("Re: Falcon round"), "Count us in");
        assert_eq!(email.search_text(), "Re: Falcon round\nCount us in");

        let no_subject = sample_email(None, "Count us in");
        assert_eq!(no_subject.search_text(), "Count us in");
    }

    #[test]
    fn confidence_clamping() {
        let scores = ConfidenceScores {
            lp: 1.5,
            deal: -0.2,
            intent: 0.5,
            amount: 0.0,
        }
        .clamped();
        assert_eq!(scores.lp, 1.0);
        assert_eq!(scores.deal, 0.0);
        assert_eq!(scores.intent, 0.5);
    }

    pub(crate) fn sample_email(subject: Option<&str>, body: &str) -> RawEmail {
        RawEmail {
            id: "email-1".into(),
            org_id: "org-1".into(),
            account_id: "acct-1".into(),
            provider_message_id: "prov-1".into(),
            thread_id: Some("thread-1".into()),
            sender_email: "jane@acmecap.com".into(),
            sender_name: Some("Jane Doe".into()),
            to: vec!["team@fund.com".into()],
            cc: vec![],
            subject: subject.map(String::from),
            body_text: body.into(),
            body_html: None,
            received_at: Utc::now(),
            has_attachments: false,
        }
    }
}
