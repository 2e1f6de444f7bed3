use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::errors::Result;

mod entries;
mod pairs;

/// Filename of the state store below the application data directory.
pub const STATE_DB_FILENAME: &str = "nextcloud-dav-sync.db";

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS pairs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        remote_root TEXT NOT NULL,
        local_root TEXT NOT NULL,
        allowed_extensions TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS entries (
        pair_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        remote_mtime INTEGER,
        remote_mtime_prev INTEGER NOT NULL DEFAULT 0,
        exists_remote INTEGER NOT NULL DEFAULT 0,
        local_mtime INTEGER,
        local_mtime_prev INTEGER NOT NULL DEFAULT 0,
        exists_local INTEGER NOT NULL DEFAULT 0,
        synced INTEGER NOT NULL DEFAULT 0,
        captured_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (pair_id, path)
    )"#,
];

/// Durable per-pair prior state. All multi-row mutations of one sync phase
/// land in a single transaction; reads during a phase see the committed
/// state of the previous phase.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Opens (and creates if missing) the state store at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory store, useful for tests. A single pooled connection keeps
    /// every statement on the same memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
