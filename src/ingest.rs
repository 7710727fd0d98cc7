//! Inbound email ingestion: raw MIME to stored, parsed rows.
//!
//! Each batch goes through three stages: MIME extraction into `RawEmail`,
//! per-email parsing via the orchestrator, then answered-question
//! detection across the whole batch. A malformed message or a failed
//! parse never aborts the batch.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use mail_parser::MessageParser;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::RawEmail;
use crate::pipeline::{AnsweredQuestionDetector, EmailParser, ParseContext};

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub received: usize,
    pub stored: usize,
    pub parsed: usize,
    pub answered_marked: usize,
    pub errors: Vec<String>,
}

pub struct Ingestor {
    parser: Arc<EmailParser>,
    detector: AnsweredQuestionDetector,
}

impl Ingestor {
    pub fn new(parser: Arc<EmailParser>) -> Self {
        let detector = AnsweredQuestionDetector::new(Arc::clone(parser.store()));
        Self { parser, detector }
    }

    /// Ingest a batch of raw MIME messages for one connected account.
    pub async fn ingest_batch(
        &self,
        org_id: &str,
        account_id: &str,
        messages: &[Vec<u8>],
    ) -> Result<IngestSummary, PipelineError> {
        let store = self.parser.store();
        let mut errors = Vec::new();
        let mut stored = Vec::new();

        for (i, raw) in messages.iter().enumerate() {
            match parse_mime(raw, org_id, account_id) {
                Ok(email) => match store.insert_raw_email(&email).await {
                    Ok(()) => stored.push(email),
                    Err(e) => {
                        warn!(index = i, error = %e, "Failed to store inbound email");
                        errors.push(format!("message[{i}]: {e}"));
                    }
                },
                Err(e) => {
                    warn!(index = i, error = %e, "Skipping malformed inbound message");
                    errors.push(format!("message[{i}]: {e}"));
                }
            }
        }

        // Candidates are fetched once per batch; stale within the batch
        // is acceptable since ingestion never creates LPs or deals.
        let context = ParseContext::load(store, org_id, self.parser.config()).await?;
        let mut parsed = 0usize;
        for email in &stored {
            match self.parser.parse_email(email, Some(&context)).await {
                Ok(_) => parsed += 1,
                Err(e) => {
                    warn!(email_id = %email.id, error = %e, "Parse failed during ingestion");
                    errors.push(format!("email {}: {e}", email.id));
                }
            }
        }

        let answered_marked = self.detector.process_batch(org_id, &stored).await?;

        info!(
            org_id,
            account_id,
            received = messages.len(),
            stored = stored.len(),
            parsed,
            answered_marked,
            "Ingestion batch complete"
        );

        Ok(IngestSummary {
            received: messages.len(),
            stored: stored.len(),
            parsed,
            answered_marked,
            errors,
        })
    }
}

/// Extract a `RawEmail` from raw MIME bytes.
pub fn parse_mime(raw: &[u8], org_id: &str, account_id: &str) -> Result<RawEmail, PipelineError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| PipelineError::MalformedEmail("unparseable MIME".into()))?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .ok_or_else(|| PipelineError::MalformedEmail("missing From address".into()))?;
    let sender_email = sender
        .address()
        .map(|s| s.to_string())
        .ok_or_else(|| PipelineError::MalformedEmail("From has no address".into()))?;
    let sender_name = sender.name().map(|s| s.to_string());

    let body_text = match parsed.body_text(0) {
        Some(text) => text.to_string(),
        None => parsed
            .body_html(0)
            .map(|html| strip_html(html.as_ref()))
            .unwrap_or_default(),
    };

    let provider_message_id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    Ok(RawEmail {
        id: Uuid::new_v4().to_string(),
        org_id: org_id.to_string(),
        account_id: account_id.to_string(),
        provider_message_id,
        thread_id: extract_thread_id(&parsed),
        sender_email,
        sender_name,
        to: address_list(parsed.to()),
        cc: address_list(parsed.cc()),
        subject: parsed.subject().map(|s| s.to_string()),
        body_text,
        body_html: parsed.body_html(0).map(|s| s.to_string()),
        received_at: extract_date(&parsed),
        has_attachments: parsed.attachment_count() > 0,
    })
}

fn address_list(addr: Option<&mail_parser::Address<'_>>) -> Vec<String> {
    addr.map(|a| {
        a.iter()
            .filter_map(|addr| addr.address())
            .map(|s| s.to_string())
            .collect()
    })
    .unwrap_or_default()
}

/// Thread identity for a message: the root of its References chain,
/// else In-Reply-To, else its own Message-ID. Replies inherit the root
/// id, so all messages of a conversation share one thread id.
fn extract_thread_id(parsed: &mail_parser::Message<'_>) -> Option<String> {
    if let Some(header) = parsed.header("References") {
        if let Some(refs) = header.as_text_list()
            && let Some(first) = refs.first()
        {
            return Some(first.to_string());
        }
        if let Some(text) = header.as_text() {
            return Some(text.to_string());
        }
    }
    if let Some(header) = parsed.header("In-Reply-To")
        && let Some(text) = header.as_text()
    {
        return Some(text.to_string());
    }
    parsed.message_id().map(|s| s.to_string())
}

fn extract_date(parsed: &mail_parser::Message<'_>) -> DateTime<Utc> {
    parsed
        .date()
        .and_then(|d| {
            NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day)).and_then(
                |date| {
                    date.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
                },
            )
        })
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}

/// Strip HTML tags, keeping readable text.
fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => result.push(c),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
