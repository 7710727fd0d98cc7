//! libSQL backend — async `EmailStore` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    ConfidenceScores, Deal, DealStatus, ExtractedEntities, Intent, LpContact, ParsedEmail,
    ParsingMethod, ProcessingStatus, RawEmail,
};
use crate::store::migrations;
use crate::store::traits::EmailStore;

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Serialize an address list as a JSON array string.
fn addrs_to_json(addrs: &[String]) -> String {
    serde_json::to_string(addrs).unwrap_or_else(|_| "[]".into())
}

fn addrs_from_json(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Build `?N, ?N+1, ...` placeholders for an IN clause.
fn placeholders(start: usize, count: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start + i))
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Row mappers ─────────────────────────────────────────────────────

const RAW_EMAIL_COLUMNS: &str = "id, org_id, account_id, provider_message_id, thread_id, \
     sender_email, sender_name, to_addrs, cc_addrs, subject, body_text, body_html, \
     received_at, has_attachments";

const PARSED_EMAIL_COLUMNS: &str = "email_id, org_id, detected_lp_id, detected_deal_id, \
     intent, status, method, entities, conf_lp, conf_deal, conf_intent, conf_amount, \
     is_answered, parsed_at";

const LP_COLUMNS: &str = "id, org_id, name, email, firm, last_interaction_at";

const DEAL_COLUMNS: &str = "id, org_id, name, company_name, status";

fn row_to_raw_email(row: &libsql::Row) -> Result<RawEmail, libsql::Error> {
    let to_json: String = row.get(7)?;
    let cc_json: String = row.get(8)?;
    let received_str: String = row.get(12)?;
    let has_attachments: i64 = row.get(13)?;

    Ok(RawEmail {
        id: row.get(0)?,
        org_id: row.get(1)?,
        account_id: row.get(2)?,
        provider_message_id: row.get(3)?,
        thread_id: row.get(4).ok(),
        sender_email: row.get(5)?,
        sender_name: row.get(6).ok(),
        to: addrs_from_json(&to_json),
        cc: addrs_from_json(&cc_json),
        subject: row.get(9).ok(),
        body_text: row.get(10)?,
        body_html: row.get(11).ok(),
        received_at: parse_datetime(&received_str),
        has_attachments: has_attachments != 0,
    })
}

fn row_to_parsed_email(row: &libsql::Row) -> Result<ParsedEmail, libsql::Error> {
    let intent_str: Option<String> = row.get(4).ok();
    let status_str: String = row.get(5)?;
    let method_str: String = row.get(6)?;
    let entities_json: String = row.get(7)?;
    let conf_lp: f64 = row.get(8)?;
    let conf_deal: f64 = row.get(9)?;
    let conf_intent: f64 = row.get(10)?;
    let conf_amount: f64 = row.get(11)?;
    let is_answered: i64 = row.get(12)?;
    let parsed_str: String = row.get(13)?;

    let entities: ExtractedEntities = serde_json::from_str(&entities_json).unwrap_or_default();

    Ok(ParsedEmail {
        email_id: row.get(0)?,
        org_id: row.get(1)?,
        detected_lp_id: row.get(2).ok(),
        detected_deal_id: row.get(3).ok(),
        intent: intent_str.as_deref().and_then(Intent::parse),
        status: ProcessingStatus::parse(&status_str).unwrap_or(ProcessingStatus::Failed),
        method: ParsingMethod::parse(&method_str).unwrap_or(ParsingMethod::SimpleRegexV1),
        entities,
        confidence: ConfidenceScores {
            lp: conf_lp as f32,
            deal: conf_deal as f32,
            intent: conf_intent as f32,
            amount: conf_amount as f32,
        },
        is_answered: is_answered != 0,
        parsed_at: parse_datetime(&parsed_str),
    })
}

fn row_to_lp(row: &libsql::Row) -> Result<LpContact, libsql::Error> {
    let last_interaction: Option<String> = row.get(5).ok();
    Ok(LpContact {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        firm: row.get(4).ok(),
        last_interaction_at: parse_optional_datetime(&last_interaction),
    })
}

fn row_to_deal(row: &libsql::Row) -> Result<Deal, libsql::Error> {
    let status_str: String = row.get(4)?;
    Ok(Deal {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        company_name: row.get(3).ok(),
        status: DealStatus::parse(&status_str).unwrap_or(DealStatus::Draft),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl EmailStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Raw emails ──────────────────────────────────────────────────

    async fn insert_raw_email(&self, email: &RawEmail) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO raw_emails (id, org_id, account_id, provider_message_id, thread_id, \
                 sender_email, sender_name, to_addrs, cc_addrs, subject, body_text, body_html, \
                 received_at, has_attachments) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    email.id.clone(),
                    email.org_id.clone(),
                    email.account_id.clone(),
                    email.provider_message_id.clone(),
                    opt_text(email.thread_id.clone()),
                    email.sender_email.clone(),
                    opt_text(email.sender_name.clone()),
                    addrs_to_json(&email.to),
                    addrs_to_json(&email.cc),
                    opt_text(email.subject.clone()),
                    email.body_text.clone(),
                    opt_text(email.body_html.clone()),
                    email.received_at.to_rfc3339(),
                    email.has_attachments as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_raw_email: {e}")))?;

        debug!(email_id = %email.id, "Raw email inserted");
        Ok(())
    }

    async fn get_raw_email(&self, id: &str) -> Result<Option<RawEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RAW_EMAIL_COLUMNS} FROM raw_emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_raw_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_raw_email(&row).map_err(|e| {
                DatabaseError::Query(format!("get_raw_email row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_raw_email: {e}"))),
        }
    }

    async fn get_raw_emails(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<RawEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RAW_EMAIL_COLUMNS} FROM raw_emails WHERE org_id = ?1 \
                     ORDER BY received_at DESC LIMIT ?2"
                ),
                params![org_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_raw_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_raw_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => tracing::warn!("Skipping raw email row: {e}"),
            }
        }
        Ok(emails)
    }

    async fn get_email_ids_in_threads(
        &self,
        org_id: &str,
        thread_ids: &[String],
    ) -> Result<Vec<String>, DatabaseError> {
        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id FROM raw_emails WHERE org_id = ?1 AND thread_id IN ({})",
            placeholders(2, thread_ids.len())
        );
        let mut values: Vec<libsql::Value> = vec![libsql::Value::Text(org_id.to_string())];
        values.extend(thread_ids.iter().map(|t| libsql::Value::Text(t.clone())));

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email_ids_in_threads: {e}")))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(id) = row.get::<String>(0) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    // ── Parsed emails ───────────────────────────────────────────────

    async fn upsert_parsed_email(&self, parsed: &ParsedEmail) -> Result<(), DatabaseError> {
        let entities_json = serde_json::to_string(&parsed.entities)
            .map_err(|e| DatabaseError::Serialization(format!("entities: {e}")))?;

        // Atomic upsert keyed on email_id — the single-row-per-email
        // invariant must hold under concurrent reparse triggers, so this is
        // one statement, not a check-then-insert sequence.
        self.conn()
            .execute(
                "INSERT INTO parsed_emails (email_id, org_id, detected_lp_id, detected_deal_id, \
                 intent, status, method, entities, conf_lp, conf_deal, conf_intent, conf_amount, \
                 is_answered, parsed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
                 ON CONFLICT(email_id) DO UPDATE SET \
                 org_id = excluded.org_id, \
                 detected_lp_id = excluded.detected_lp_id, \
                 detected_deal_id = excluded.detected_deal_id, \
                 intent = excluded.intent, \
                 status = excluded.status, \
                 method = excluded.method, \
                 entities = excluded.entities, \
                 conf_lp = excluded.conf_lp, \
                 conf_deal = excluded.conf_deal, \
                 conf_intent = excluded.conf_intent, \
                 conf_amount = excluded.conf_amount, \
                 is_answered = excluded.is_answered, \
                 parsed_at = excluded.parsed_at",
                params![
                    parsed.email_id.clone(),
                    parsed.org_id.clone(),
                    opt_text(parsed.detected_lp_id.clone()),
                    opt_text(parsed.detected_deal_id.clone()),
                    opt_text(parsed.intent.map(|i| i.as_str().to_string())),
                    parsed.status.as_str(),
                    parsed.method.as_str(),
                    entities_json,
                    parsed.confidence.lp as f64,
                    parsed.confidence.deal as f64,
                    parsed.confidence.intent as f64,
                    parsed.confidence.amount as f64,
                    parsed.is_answered as i64,
                    parsed.parsed_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_parsed_email: {e}")))?;

        debug!(email_id = %parsed.email_id, method = parsed.method.as_str(), "Parsed email upserted");
        Ok(())
    }

    async fn get_parsed_email(
        &self,
        email_id: &str,
    ) -> Result<Option<ParsedEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PARSED_EMAIL_COLUMNS} FROM parsed_emails WHERE email_id = ?1"),
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_parsed_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_parsed_email(&row).map_err(|e| {
                DatabaseError::Query(format!("get_parsed_email row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_parsed_email: {e}"))),
        }
    }

    async fn get_reparse_candidates(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<RawEmail>, DatabaseError> {
        let columns: String = RAW_EMAIL_COLUMNS
            .split(", ")
            .map(|c| format!("r.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {columns} FROM raw_emails r \
                     JOIN parsed_emails p ON p.email_id = r.id \
                     WHERE r.org_id = ?1 AND (p.method = 'simple-regex-v1' OR p.status = 'failed') \
                     ORDER BY r.received_at DESC LIMIT ?2"
                ),
                params![org_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_reparse_candidates: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_raw_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => tracing::warn!("Skipping reparse candidate row: {e}"),
            }
        }
        Ok(emails)
    }

    async fn mark_questions_answered(
        &self,
        email_ids: &[String],
    ) -> Result<usize, DatabaseError> {
        if email_ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE parsed_emails SET is_answered = 1 \
             WHERE email_id IN ({}) AND intent = 'question' AND is_answered = 0",
            placeholders(1, email_ids.len())
        );
        let values: Vec<libsql::Value> = email_ids
            .iter()
            .map(|id| libsql::Value::Text(id.clone()))
            .collect();

        let updated = self
            .conn()
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_questions_answered: {e}")))?;

        Ok(updated as usize)
    }

    // ── LP contacts ─────────────────────────────────────────────────

    async fn insert_lp_contact(&self, lp: &LpContact) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO lp_contacts (id, org_id, name, email, firm, last_interaction_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    lp.id.clone(),
                    lp.org_id.clone(),
                    lp.name.clone(),
                    lp.email.clone(),
                    opt_text(lp.firm.clone()),
                    opt_text(lp.last_interaction_at.map(|t| t.to_rfc3339())),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Constraint(format!("insert_lp_contact: {e}")))?;
        Ok(())
    }

    async fn get_lp_contacts(
        &self,
        org_id: &str,
        limit: usize,
    ) -> Result<Vec<LpContact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LP_COLUMNS} FROM lp_contacts WHERE org_id = ?1 \
                     ORDER BY name ASC LIMIT ?2"
                ),
                params![org_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lp_contacts: {e}")))?;

        let mut lps = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_lp(&row) {
                Ok(lp) => lps.push(lp),
                Err(e) => tracing::warn!("Skipping LP contact row: {e}"),
            }
        }
        Ok(lps)
    }

    async fn update_lp_last_interaction(
        &self,
        lp_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE lp_contacts SET last_interaction_at = ?1 WHERE id = ?2",
                params![timestamp.to_rfc3339(), lp_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_lp_last_interaction: {e}")))?;
        Ok(())
    }

    // ── Deals ───────────────────────────────────────────────────────

    async fn insert_deal(&self, deal: &Deal) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO deals (id, org_id, name, company_name, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    deal.id.clone(),
                    deal.org_id.clone(),
                    deal.name.clone(),
                    opt_text(deal.company_name.clone()),
                    deal.status.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Constraint(format!("insert_deal: {e}")))?;
        Ok(())
    }

    async fn get_deals(
        &self,
        org_id: &str,
        statuses: &[DealStatus],
        limit: usize,
    ) -> Result<Vec<Deal>, DatabaseError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE org_id = ?1 AND status IN ({}) \
             ORDER BY rowid DESC LIMIT ?{}",
            placeholders(2, statuses.len()),
            statuses.len() + 2
        );
        let mut values: Vec<libsql::Value> = vec![libsql::Value::Text(org_id.to_string())];
        values.extend(
            statuses
                .iter()
                .map(|s| libsql::Value::Text(s.as_str().to_string())),
        );
        values.push(libsql::Value::Integer(limit as i64));

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("get_deals: {e}")))?;

        let mut deals = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_deal(&row) {
                Ok(deal) => deals.push(deal),
                Err(e) => tracing::warn!("Skipping deal row: {e}"),
            }
        }
        Ok(deals)
    }

    async fn get_deal(
        &self,
        org_id: &str,
        deal_id: &str,
    ) -> Result<Option<Deal>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEAL_COLUMNS} FROM deals WHERE org_id = ?1 AND id = ?2"),
                params![org_id, deal_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_deal: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_deal(&row).map_err(|e| {
                DatabaseError::Query(format!("get_deal row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_deal: {e}"))),
        }
    }

    // ── Connected accounts ──────────────────────────────────────────

    async fn add_connected_account(
        &self,
        org_id: &str,
        email: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO connected_accounts (id, org_id, email, active) \
                 VALUES (?1, ?2, ?3, 1)",
                params![Uuid::new_v4().to_string(), org_id, email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_connected_account: {e}")))?;
        Ok(())
    }

    async fn get_connected_account_emails(
        &self,
        org_id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT email FROM connected_accounts WHERE org_id = ?1 AND active = 1",
                params![org_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_connected_account_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(email) = row.get::<String>(0) {
                emails.push(email);
            }
        }
        Ok(emails)
    }
}
