//! Detects LP questions that the team has since replied to.
//!
//! A question is considered answered when a later email in the same
//! thread was sent from one of the org's connected accounts (i.e. a
//! team member replied). Detection runs over each freshly ingested
//! batch; only rows with a question intent are ever flipped, and a row
//! is flipped at most once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::model::RawEmail;
use crate::store::EmailStore;

pub struct AnsweredQuestionDetector {
    store: Arc<dyn EmailStore>,
}

impl AnsweredQuestionDetector {
    pub fn new(store: Arc<dyn EmailStore>) -> Self {
        Self { store }
    }

    /// Scan a batch of newly ingested emails for team replies and mark
    /// the question emails in the affected threads as answered.
    ///
    /// Returns the number of rows updated.
    pub async fn process_batch(
        &self,
        org_id: &str,
        batch: &[RawEmail],
    ) -> Result<usize, PipelineError> {
        let connected: HashSet<String> = self
            .store
            .get_connected_account_emails(org_id)
            .await?
            .into_iter()
            .map(|e| e.trim().to_lowercase())
            .collect();

        if connected.is_empty() {
            return Ok(0);
        }

        // Threads where a team member just replied
        let replied_threads: Vec<String> = batch
            .iter()
            .filter(|email| connected.contains(&email.sender_email.trim().to_lowercase()))
            .filter_map(|email| email.thread_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if replied_threads.is_empty() {
            return Ok(0);
        }

        debug!(
            org_id,
            threads = replied_threads.len(),
            "Team replies detected, scanning threads for open questions"
        );

        let email_ids = self
            .store
            .get_email_ids_in_threads(org_id, &replied_threads)
            .await?;
        if email_ids.is_empty() {
            return Ok(0);
        }

        let updated = self.store.mark_questions_answered(&email_ids).await?;
        if updated > 0 {
            info!(org_id, updated, "Marked LP questions as answered");
        }
        Ok(updated)
    }
}
