//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `conversations` - Conversations, messages and attachments
//! - `receipts` - Receipts, line items, extraction runs, duplicate lookups
//!   and corrections
//!
//! Money columns hold integer cents (`*_cents`) so equality and ordering in
//! SQL are exact. Timestamps are RFC 3339 strings with millisecond precision;
//! ties are broken by `rowid`, which follows insertion order.

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::money_to_cents;

mod conversations;
mod receipts;

pub use receipts::{MAX_LIST_LIMIT, MAX_SEARCH_LIMIT};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Current time in the stored timestamp format
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Monetary amount as integer cents
///
/// Amounts beyond the `i64` cents range are rejected as `invalid_amount`.
pub(crate) fn to_cents(amount: Decimal) -> Result<i64> {
    money_to_cents(amount).ok_or_else(|| {
        Error::invalid_input("invalid_amount", format!("Monto fuera de rango: {}", amount))
    })
}

pub(crate) fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) a database and run migrations
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;
        debug!(path, "Database ready");

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` so every pooled
    /// connection sees the same database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "recibo_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().into_owned();

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                text TEXT NOT NULL,
                intent TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS attachments (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL REFERENCES messages(id),
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attachments_hash ON attachments(content_hash);

            CREATE TABLE IF NOT EXISTS receipts (
                id TEXT PRIMARY KEY,
                attachment_id TEXT REFERENCES attachments(id),
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                vendor_name TEXT NOT NULL,
                vendor_tax_id TEXT,
                receipt_number TEXT,
                issue_date TEXT,
                currency TEXT NOT NULL,
                subtotal_cents INTEGER,
                tax_cents INTEGER,
                total_cents INTEGER,
                payment_method TEXT,
                confidence REAL,
                status TEXT NOT NULL,
                raw_text TEXT,
                payload TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_receipts_attachment ON receipts(attachment_id);
            CREATE INDEX IF NOT EXISTS idx_receipts_business_key
                ON receipts(receipt_number, issue_date, total_cents);
            CREATE INDEX IF NOT EXISTS idx_receipts_issue_date ON receipts(issue_date);
            CREATE INDEX IF NOT EXISTS idx_receipts_created ON receipts(created_at);

            CREATE TABLE IF NOT EXISTS receipt_items (
                id TEXT PRIMARY KEY,
                receipt_id TEXT NOT NULL REFERENCES receipts(id),
                position INTEGER NOT NULL,
                description TEXT NOT NULL,
                quantity TEXT NOT NULL,
                unit_price_cents INTEGER,
                line_total_cents INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_receipt_items_receipt ON receipt_items(receipt_id);

            -- Audit trail of analysis attempts; never read by processing logic
            CREATE TABLE IF NOT EXISTS extraction_runs (
                id TEXT PRIMARY KEY,
                receipt_id TEXT NOT NULL REFERENCES receipts(id),
                provider TEXT NOT NULL,
                model TEXT,
                success INTEGER NOT NULL,
                latency_ms INTEGER,
                error TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_extraction_runs_receipt ON extraction_runs(receipt_id);
            "#,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;
