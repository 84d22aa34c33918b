//! SQLite-backed document store
//!
//! Documents live in a single `documents` table keyed by
//! `(collection, key)`. The unique constraint is what keeps keyed documents
//! (such as the active proxy slot) from ever being duplicated, and upserts are
//! a single `INSERT ... ON CONFLICT DO UPDATE` statement.

use crate::store::{DocumentStore, Filter, Result, StoreError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Current schema version for migrations
const SCHEMA_VERSION: i32 = 2;

/// SQLite connection wrapper with serialized access
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("open", &self.conn.lock().is_some())
            .finish()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;

        Self::run_migrations(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            info!("Running migrations from v{} to v{}", current_version, SCHEMA_VERSION);

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }

            if current_version < 2 {
                Self::migrate_v2(conn)?;
            }
        }

        Ok(())
    }

    /// Migration v1: document table
    fn migrate_v1(conn: &Connection) -> Result<()> {
        debug!("Applying migration v1: documents table");

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (collection, key)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection_seq
                ON documents(collection, seq);

            INSERT INTO schema_migrations (version) VALUES (1);
        "#)?;
        tx.commit()?;

        Ok(())
    }

    /// Migration v2: track when a keyed document was last replaced
    fn migrate_v2(conn: &Connection) -> Result<()> {
        debug!("Applying migration v2: updated_at column");

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(r#"
            ALTER TABLE documents ADD COLUMN updated_at TEXT;

            INSERT INTO schema_migrations (version) VALUES (2);
        "#)?;
        tx.commit()?;

        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn decode_rows(bodies: Vec<String>) -> Result<Vec<Value>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

impl DocumentStore for SqliteStore {
    fn insert(&self, collection: &str, key: &str, document: &Value) -> Result<()> {
        let body = serde_json::to_string(document)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, key, body) VALUES (?1, ?2, ?3)",
                params![collection, key, body],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::from(e)
                }
            })?;
            Ok(())
        })
    }

    fn find(&self, collection: &str, filter: Filter<'_>, limit: usize) -> Result<Vec<Value>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let bodies: Vec<String> = self.with_conn(|conn| match filter {
            Filter::Key(key) => {
                let body: Option<String> = conn
                    .query_row(
                        "SELECT body FROM documents WHERE collection = ?1 AND key = ?2 LIMIT ?3",
                        params![collection, key, limit],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(body.into_iter().collect())
            }
            Filter::All => {
                let mut stmt = conn.prepare(
                    "SELECT body FROM (
                        SELECT seq, body FROM documents
                        WHERE collection = ?1
                        ORDER BY seq DESC
                        LIMIT ?2
                     ) ORDER BY seq ASC",
                )?;
                let bodies = stmt
                    .query_map(params![collection, limit], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(bodies)
            }
        })?;

        decode_rows(bodies)
    }

    fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()> {
        let body = serde_json::to_string(document)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, key, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, key)
                 DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
                params![collection, key, body],
            )?;
            Ok(())
        })
    }

    fn delete_one(&self, collection: &str, key: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )?;
            Ok(removed as u64)
        })
    }

    fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| StoreError::from(e))?;
            info!("Database closed");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
