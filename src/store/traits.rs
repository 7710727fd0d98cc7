//! `EmailStore` trait — single async interface for all persistence.
//!
//! Every pipeline component takes an `Arc<dyn EmailStore>` handle rather
//! than reaching for an ambient client, so tests can substitute an
//! in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::model::{Deal, DealStatus, LpContact, ParsedEmail, RawEmail};

/// Backend-agnostic store covering raw emails, parsed results, LP contacts,
/// deals, and connected mailbox accounts.
#[async_trait]
pub trait EmailStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Raw emails ──────────────────────────────────────────────────

    /// Insert an ingested email. Raw emails are immutable once written.
    async fn insert_raw_email(&self, email: &RawEmail) -> Result<(), DatabaseError>;

    /// Get a raw email by id.
    async fn get_raw_email(&self, id: &str) -> Result<Option<RawEmail>, DatabaseError>;

    /// Get up to `limit` raw emails for an organization, most recent first.
    async fn get_raw_emails(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<RawEmail>, DatabaseError>;

    /// Ids of all raw emails in the given threads within the organization.
    async fn get_email_ids_in_threads(
        &self,
        org_id: &str,
        thread_ids: &[String],
    ) -> Result<Vec<String>, DatabaseError>;

    // ── Parsed emails ───────────────────────────────────────────────

    /// True upsert keyed on `email_id`: at most one row per raw email,
    /// enforced atomically at the storage layer.
    async fn upsert_parsed_email(&self, parsed: &ParsedEmail) -> Result<(), DatabaseError>;

    /// Get the parsed record for an email, if any.
    async fn get_parsed_email(
        &self,
        email_id: &str,
    ) -> Result<Option<ParsedEmail>, DatabaseError>;

    /// Raw emails previously parsed by the deterministic fallback or marked
    /// failed — the reparse-all candidate set.
    async fn get_reparse_candidates(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<RawEmail>, DatabaseError>;

    /// Mark open questions among `email_ids` as answered.
    /// Returns the number of rows updated.
    async fn mark_questions_answered(
        &self,
        email_ids: &[String],
    ) -> Result<usize, DatabaseError>;

    // ── LP contacts ─────────────────────────────────────────────────

    /// Insert a known LP contact. Contact creation is an explicit user
    /// action; the pipeline itself never calls this.
    async fn insert_lp_contact(&self, lp: &LpContact) -> Result<(), DatabaseError>;

    /// Get up to `limit` LP contacts for an organization.
    async fn get_lp_contacts(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<LpContact>, DatabaseError>;

    /// Overwrite an LP's last-interaction timestamp.
    async fn update_lp_last_interaction(
        &self,
        lp_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Deals ───────────────────────────────────────────────────────

    /// Insert a deal (boundary seeding; the pipeline never mutates deals).
    async fn insert_deal(&self, deal: &Deal) -> Result<(), DatabaseError>;

    /// Get up to `limit` deals with any of the given statuses.
    async fn get_deals(
        &self,
        org_id: &str,
        statuses: &[DealStatus],
        limit: usize,
    ) -> Result<Vec<Deal>, DatabaseError>;

    /// Get one deal by id within an organization.
    async fn get_deal(&self, org_id: &str, deal_id: &str)
        -> Result<Option<Deal>, DatabaseError>;

    // ── Connected accounts ──────────────────────────────────────────

    /// Register a connected mailbox address for team-reply detection.
    async fn add_connected_account(
        &self,
        org_id: &str,
        email: &str,
    ) -> Result<(), DatabaseError>;

    /// Email addresses of active connected mailbox accounts.
    async fn get_connected_account_emails(
        &self,
        org_id: &str,
    ) -> Result<Vec<String>, DatabaseError>;
}
