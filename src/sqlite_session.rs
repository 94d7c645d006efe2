//! # SQLite session backend
//!
//! Stores each [`Session`] as one JSON document in a `sessions` table keyed by
//! the session id. Writes are upserts, so a `put` is a whole-document
//! overwrite and the last writer wins. The schema is created on connect.
//!
//! ```rust,no_run
//! use switchboard::sessions::SessionStore;
//! use switchboard::sqlite_session::SqliteBackend;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::connect("sessions.db").await?;
//! let store = SessionStore::new(backend, 20);
//! let session = store.create("User").await;
//! assert!(store.get(&session.id).await.is_some());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};

use crate::error::Result;
use crate::session::{Session, SessionId};
use crate::sessions::SessionBackend;

/// A [`SessionBackend`] backed by a SQLite database.
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Open (creating if needed) the database file at `db_path`.
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Open from a `sqlite:` URL, e.g. `sqlite://data/sessions.db` or `sqlite::memory:`.
    pub async fn connect_url(url: &str) -> Result<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database, useful for tests.
    ///
    /// Every pooled connection would get its own private memory database,
    /// so the pool is pinned to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY NOT NULL,
                document TEXT NOT NULL,
                status TEXT NOT NULL,
                current_agent TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Number of stored sessions.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl SessionBackend for SqliteBackend {
    async fn put(&self, session: &Session) -> Result<()> {
        let document = serde_json::to_string(session)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, document, status, current_agent, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                document = excluded.document,
                status = excluded.status,
                current_agent = excluded.current_agent,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session.id.as_str())
        .bind(document)
        .bind(session.status.as_str())
        .bind(&session.current_agent)
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT document FROM sessions WHERE session_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{Message, ToolCall};
    use crate::session::SessionStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let mut session = Session::new("User", 20);
        session.add_message(Message::user("Hello"));

        backend.put(&session).await.unwrap();
        let loaded = backend.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_put_overwrites_document() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let mut session = Session::new("User", 20);
        backend.put(&session).await.unwrap();

        session.add_message(Message::tool_call(
            "InvoiceAgent",
            ToolCall::new("c1", "lookup_invoice", json!({"invoice_id": "INV-1001"})),
        ));
        session.add_message(Message::tool_result("c1", "{}"));
        session.set_status(SessionStatus::Completed);
        backend.put(&session).await.unwrap();

        let loaded = backend.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let missing = backend.get(&SessionId::from("missing")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let mut a = Session::new("User", 20);
        let mut b = Session::new("User", 20);
        a.add_message(Message::user("Session 1 message"));
        b.add_message(Message::user("Session 2 message"));
        backend.put(&a).await.unwrap();
        backend.put(&b).await.unwrap();

        let la = backend.get(&a.id).await.unwrap().unwrap();
        let lb = backend.get(&b.id).await.unwrap().unwrap();
        assert_eq!(la.messages()[0].content(), "Session 1 message");
        assert_eq!(lb.messages()[0].content(), "Session 2 message");
    }
}
