//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS raw_emails (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                provider_message_id TEXT NOT NULL,
                thread_id TEXT,
                sender_email TEXT NOT NULL,
                sender_name TEXT,
                to_addrs TEXT NOT NULL DEFAULT '[]',
                cc_addrs TEXT NOT NULL DEFAULT '[]',
                subject TEXT,
                body_text TEXT NOT NULL,
                body_html TEXT,
                received_at TEXT NOT NULL,
                has_attachments INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_raw_emails_org ON raw_emails(org_id);
            CREATE INDEX IF NOT EXISTS idx_raw_emails_thread ON raw_emails(thread_id);
            CREATE INDEX IF NOT EXISTS idx_raw_emails_received ON raw_emails(received_at);

            CREATE TABLE IF NOT EXISTS lp_contacts (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                firm TEXT,
                last_interaction_at TEXT,
                UNIQUE (org_id, email)
            );
            CREATE INDEX IF NOT EXISTS idx_lp_contacts_org ON lp_contacts(org_id);

            CREATE TABLE IF NOT EXISTS deals (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                company_name TEXT,
                status TEXT NOT NULL DEFAULT 'draft'
            );
            CREATE INDEX IF NOT EXISTS idx_deals_org_status ON deals(org_id, status);

            CREATE TABLE IF NOT EXISTS connected_accounts (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                email TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                UNIQUE (org_id, email)
            );
            CREATE INDEX IF NOT EXISTS idx_connected_accounts_org ON connected_accounts(org_id);
        "#,
    },
    Migration {
        version: 2,
        name: "parsed_emails",
        sql: r#"
            CREATE TABLE IF NOT EXISTS parsed_emails (
                email_id TEXT PRIMARY KEY REFERENCES raw_emails(id),
                org_id TEXT NOT NULL,
                detected_lp_id TEXT,
                detected_deal_id TEXT,
                intent TEXT,
                status TEXT NOT NULL,
                method TEXT NOT NULL,
                entities TEXT NOT NULL DEFAULT '{}',
                conf_lp REAL NOT NULL DEFAULT 0,
                conf_deal REAL NOT NULL DEFAULT 0,
                conf_intent REAL NOT NULL DEFAULT 0,
                conf_amount REAL NOT NULL DEFAULT 0,
                parsed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_parsed_emails_org ON parsed_emails(org_id);
            CREATE INDEX IF NOT EXISTS idx_parsed_emails_deal ON parsed_emails(detected_deal_id);
            CREATE INDEX IF NOT EXISTS idx_parsed_emails_method ON parsed_emails(method);
        "#,
    },
    Migration {
        version: 3,
        name: "answered_question_tracking",
        sql: r#"
            ALTER TABLE parsed_emails ADD COLUMN is_answered INTEGER NOT NULL DEFAULT 0;
            CREATE INDEX IF NOT EXISTS idx_parsed_emails_open_questions
                ON parsed_emails(intent, is_answered);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "raw_emails",
            "parsed_emails",
            "lp_contacts",
            "deals",
            "connected_accounts",
            "_migrations",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn parsed_emails_unique_on_email_id() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO parsed_emails (email_id, org_id, status, method, parsed_at)
             VALUES ('e1', 'o1', 'success', 'simple-regex-v1', '2026-01-01T00:00:00Z')",
            (),
        )
        .await
        .unwrap();

        // Plain insert on the same key must fail — idempotence relies on
        // this constraint plus the ON CONFLICT upsert.
        let dup = conn
            .execute(
                "INSERT INTO parsed_emails (email_id, org_id, status, method, parsed_at)
                 VALUES ('e1', 'o1', 'success', 'ai', '2026-01-02T00:00:00Z')",
                (),
            )
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        let v1: i64 = row1.get(0).unwrap();
        let n1: String = row1.get(1).unwrap();
        assert_eq!(v1, 1);
        assert_eq!(n1, "initial_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        let n2: String = row2.get(1).unwrap();
        assert_eq!(n2, "parsed_emails");

        let row3 = rows.next().await.unwrap().unwrap();
        let n3: String = row3.get(1).unwrap();
        assert_eq!(n3, "answered_question_tracking");
    }
}
