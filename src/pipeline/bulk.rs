//! Bulk parsing operations: deal backfill and org-wide reparse.
//!
//! Both run under the shared batch runner with a wall-clock budget, so a
//! large mailbox degrades to partial progress instead of an aborted run.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::pipeline::batch::{BatchOutcome, process_in_batches};
use crate::pipeline::orchestrator::{EmailParser, ParseContext};

/// Result of a deal backfill run.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillSummary {
    pub total: usize,
    pub processed: usize,
    /// Emails whose detected deal is the backfill target.
    pub matched: usize,
    pub errors: Vec<String>,
}

/// Result of an org-wide reparse run.
#[derive(Debug, Clone, Serialize)]
pub struct ReparseSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Re-run parsing over an org's stored emails so an existing deal picks
/// up historical matches.
///
/// The deal must exist in the org; candidates are fetched once up front
/// and shared across the whole run.
pub async fn backfill_deal(
    parser: &EmailParser,
    org_id: &str,
    deal_id: &str,
) -> Result<BackfillSummary, PipelineError> {
    let config = parser.config();
    let store = parser.store();

    let Some(_deal) = store.get_deal(org_id, deal_id).await? else {
        return Err(PipelineError::DealNotFound {
            org_id: org_id.to_string(),
            deal_id: deal_id.to_string(),
        });
    };

    let context = ParseContext::load(store, org_id, config).await?;
    let emails = store.get_raw_emails(org_id, config.bulk_limit).await?;
    let total = emails.len();
    info!(org_id, deal_id, total, "Starting deal backfill");

    let deadline = Instant::now() + config.bulk_timeout;
    let context_ref = &context;
    let outcome = process_in_batches(
        emails,
        config.batch_size,
        Some(deadline),
        |_, _| {},
        |email| async move { parser.parse_email(&email, Some(context_ref)).await },
    )
    .await;

    let matched = outcome
        .results
        .iter()
        .filter(|item| item.value.detected_deal_id.as_deref() == Some(deal_id))
        .count();

    let summary = BackfillSummary {
        total,
        processed: outcome.attempted(),
        matched,
        errors: sample_errors(&outcome, config.error_sample),
    };
    log_completion("backfill", org_id, &outcome, summary.processed, total);
    Ok(summary)
}

/// Reparse every email whose current result is stale: simple-parsed rows
/// and failed rows. Typically run after the AI classifier is configured
/// or its prompt is upgraded.
pub async fn reparse_all(
    parser: &EmailParser,
    org_id: &str,
) -> Result<ReparseSummary, PipelineError> {
    let config = parser.config();
    let store = parser.store();

    let context = ParseContext::load(store, org_id, config).await?;
    let emails = store.get_reparse_candidates(org_id, config.bulk_limit).await?;
    let total = emails.len();
    info!(org_id, total, "Starting reparse of stale emails");

    let deadline = Instant::now() + config.bulk_timeout;
    let context_ref = &context;
    let outcome = process_in_batches(
        emails,
        config.batch_size,
        Some(deadline),
        |_, _| {},
        |email| async move { parser.parse_email(&email, Some(context_ref)).await },
    )
    .await;

    let summary = ReparseSummary {
        total,
        processed: outcome.attempted(),
        succeeded: outcome.results.len(),
        failed: outcome.errors.len(),
        errors: sample_errors(&outcome, config.error_sample),
    };
    log_completion("reparse", org_id, &outcome, summary.processed, total);
    Ok(summary)
}

/// Keep only the first `limit` error messages for the summary payload.
fn sample_errors<T>(outcome: &BatchOutcome<T>, limit: usize) -> Vec<String> {
    outcome
        .errors
        .iter()
        .take(limit)
        .map(|e| format!("email[{}]: {}", e.index, e.message))
        .collect()
}

fn log_completion<T>(
    operation: &str,
    org_id: &str,
    outcome: &BatchOutcome<T>,
    processed: usize,
    total: usize,
) {
    if outcome.deadline_hit {
        warn!(
            operation,
            org_id, processed, total, "Bulk run hit its time budget, partial results kept"
        );
    } else {
        info!(operation, org_id, processed, total, "Bulk run complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::config::PipelineConfig;
    use crate::model::{Deal, DealStatus, LpContact, RawEmail};
    use crate::store::{EmailStore, LibSqlBackend};

    fn email(id: &str, sender: &str, body: &str) -> RawEmail {
        RawEmail {
            id: id.into(),
            org_id: "org-1".into(),
            account_id: "acct-1".into(),
            provider_message_id: format!("prov-{id}"),
            thread_id: None,
            sender_email: sender.into(),
            sender_name: None,
            to: vec![],
            cc: vec![],
            subject: None,
            body_text: body.into(),
            body_html: None,
            received_at: Utc::now(),
            has_attachments: false,
        }
    }

    async fn seeded_store() -> Arc<dyn EmailStore> {
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

    #[tokio::test]
    async fn backfill_counts_matches_for_the_target_deal() {
        let store = seeded_store().await;
        store
            .insert_raw_email(&email("e1", "jane@acmecap.com", "Excited about Project Falcon"))
            .await
            .unwrap();
        store
            .insert_raw_email(&email("e2", "jane@acmecap.com", "Unrelated note"))
            .await
            .unwrap();
        store
            .insert_raw_email(&email("e3", "bob@other.com", "Project Falcon terms?"))
            .await
            .unwrap();

        let parser = EmailParser::new(Arc::clone(&store), None, PipelineConfig::default());
        let summary = backfill_deal(&parser, "org-1", "deal-falcon").await.unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.matched, 2);
        assert!(summary.errors.is_empty());

        // Every processed email now has a parsed row
        for id in ["e1", "e2", "e3"] {
            assert!(store.get_parsed_email(id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn backfill_rejects_unknown_deal() {
        let store = seeded_store().await;
        let parser = EmailParser::new(Arc::clone(&store), None, PipelineConfig::default());

        let err = backfill_deal(&parser, "org-1", "deal-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DealNotFound { .. }));
    }

    #[tokio::test]
    async fn backfill_rejects_deal_from_another_org() {
        let store = seeded_store().await;
        store
            .insert_deal(&Deal {
                id: "deal-other".into(),
                org_id: "org-2".into(),
                name: "Other".into(),
                company_name: None,
                status: DealStatus::Active,
            })
            .await
            .unwrap();

        let parser = EmailParser::new(Arc::clone(&store), None, PipelineConfig::default());
        let err = backfill_deal(&parser, "org-1", "deal-other")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DealNotFound { .. }));
    }

    #[tokio::test]
    async fn reparse_targets_only_stale_rows() {
        let store = seeded_store().await;
        store
            .insert_raw_email(&email("e1", "jane@acmecap.com", "Project Falcon update"))
            .await
            .unwrap();

        let parser = EmailParser::new(Arc::clone(&store), None, PipelineConfig::default());

        // Simple-parse the email so it becomes a reparse candidate
        let e1 = store.get_raw_email("e1").await.unwrap().unwrap();
        parser.parse_email(&e1, None).await.unwrap();

        let summary = reparse_all(&parser, "org-1").await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);

        // Still simple-parsed (no classifier), so it remains a candidate
        let again = reparse_all(&parser, "org-1").await.unwrap();
        assert_eq!(again.total, 1);
    }

    #[tokio::test]
    async fn reparse_with_no_candidates_is_a_noop() {
        let store = seeded_store().await;
        let parser = EmailParser::new(Arc::clone(&store), None, PipelineConfig::default());

        let summary = reparse_all(&parser, "org-1").await.unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.processed, 0);
    }
}
