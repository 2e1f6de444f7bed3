use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::errors::Result;
use crate::models::{Entry, SyncAction};

const ENTRY_COLUMNS: &str = "pair_id, path, remote_mtime, remote_mtime_prev, exists_remote, \
     local_mtime, local_mtime_prev, exists_local, synced, captured_at";

fn row_to_entry(row: SqliteRow) -> Entry {
    Entry {
        pair_id: row.get("pair_id"),
        path: row.get("path"),
        remote_mtime: row.get("remote_mtime"),
        remote_mtime_prev: row.get("remote_mtime_prev"),
        exists_remote: row.get("exists_remote"),
        local_mtime: row.get("local_mtime"),
        local_mtime_prev: row.get("local_mtime_prev"),
        exists_local: row.get("exists_local"),
        synced: row.get("synced"),
        captured_at: row.get("captured_at"),
    }
}

/// Phase predicates at the SQL level, mirrored by
/// [`crate::classifier::matches`]. An entry may satisfy a later phase's
/// predicate after an earlier phase has materialized its side effects;
/// that is how a conflict-flagged path flows into the download phase.
fn predicate_for(action: SyncAction) -> Option<&'static str> {
    match action {
        SyncAction::Conflict => Some(
            "exists_remote = 1 AND exists_local = 1 \
             AND remote_mtime <> remote_mtime_prev \
             AND local_mtime <> local_mtime_prev \
             AND remote_mtime_prev <> 0 AND local_mtime_prev <> 0",
        ),
        SyncAction::Download => {
            Some("(exists_local = 0 AND synced = 0) OR (synced = 1 AND remote_mtime > local_mtime)")
        }
        SyncAction::Upload => {
            Some("(exists_remote = 0 AND synced = 0) OR (synced = 1 AND remote_mtime < local_mtime)")
        }
        SyncAction::DeleteRemote => Some("exists_remote = 1 AND exists_local = 0 AND synced = 1"),
        SyncAction::DeleteLocal => Some("exists_remote = 0 AND synced = 1"),
        SyncAction::NoOp => None,
    }
}

impl Database {
    /// Opens a snapshot cycle: both `exists_*` flags of the pair drop to
    /// false and only re-observation sets them again.
    pub async fn begin_pass(&self, pair_id: i64, captured_at: i64) -> Result<()> {
        sqlx::query(
            "UPDATE entries SET exists_remote = 0, exists_local = 0, captured_at = ? \
             WHERE pair_id = ?",
        )
        .bind(captured_at)
        .bind(pair_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies one remote snapshot as a batch of upserts in a single
    /// transaction. Local fields are never touched.
    pub async fn record_remote_snapshot(
        &self,
        pair_id: i64,
        observations: &[(String, i64)],
        captured_at: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (path, mtime) in observations {
            sqlx::query(
                r#"INSERT INTO entries (pair_id, path, remote_mtime, exists_remote, captured_at)
                   VALUES (?, ?, ?, 1, ?)
                   ON CONFLICT(pair_id, path) DO UPDATE SET
                       remote_mtime = excluded.remote_mtime,
                       exists_remote = 1,
                       captured_at = excluded.captured_at"#,
            )
            .bind(pair_id)
            .bind(path)
            .bind(mtime)
            .bind(captured_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Symmetric to [`Database::record_remote_snapshot`] for the local side.
    pub async fn record_local_snapshot(
        &self,
        pair_id: i64,
        observations: &[(String, i64)],
        captured_at: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (path, mtime) in observations {
            sqlx::query(
                r#"INSERT INTO entries (pair_id, path, local_mtime, exists_local, captured_at)
                   VALUES (?, ?, ?, 1, ?)
                   ON CONFLICT(pair_id, path) DO UPDATE SET
                       local_mtime = excluded.local_mtime,
                       exists_local = 1,
                       captured_at = excluded.captured_at"#,
            )
            .bind(pair_id)
            .bind(path)
            .bind(mtime)
            .bind(captured_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Entries of the pair matching the given phase predicate.
    pub async fn select_for_action(&self, pair_id: i64, action: SyncAction) -> Result<Vec<Entry>> {
        let Some(predicate) = predicate_for(action) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {} FROM entries WHERE pair_id = ? AND ({}) ORDER BY path",
            ENTRY_COLUMNS, predicate
        );
        let rows = sqlx::query(&sql).bind(pair_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    pub async fn entries_for_pair(&self, pair_id: i64) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE pair_id = ? ORDER BY path",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(pair_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    pub async fn get_entry(&self, pair_id: i64, path: &str) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE pair_id = ? AND path = ?",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(pair_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_entry))
    }

    /// Registers conflict copies as fresh local observations, one
    /// transaction for the whole phase.
    pub async fn commit_conflict_copies(
        &self,
        pair_id: i64,
        copies: &[(String, i64)],
        captured_at: i64,
    ) -> Result<()> {
        self.record_local_snapshot(pair_id, copies, captured_at).await
    }

    /// Marks downloaded paths as present and in sync with the remote
    /// mtime, one transaction for the whole phase.
    pub async fn commit_downloads(&self, pair_id: i64, results: &[(String, i64)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (path, mtime) in results {
            sqlx::query(
                "UPDATE entries SET exists_local = 1, local_mtime = ?, synced = 1 \
                 WHERE pair_id = ? AND path = ?",
            )
            .bind(mtime)
            .bind(pair_id)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Marks uploaded paths as present remotely and in sync, one
    /// transaction for the whole phase.
    pub async fn commit_uploads(&self, pair_id: i64, results: &[(String, i64)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (path, mtime) in results {
            sqlx::query(
                "UPDATE entries SET exists_remote = 1, remote_mtime = ?, synced = 1 \
                 WHERE pair_id = ? AND path = ?",
            )
            .bind(mtime)
            .bind(pair_id)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drops rows whose files were deleted on either side, one transaction
    /// for the whole phase.
    pub async fn commit_drops(&self, pair_id: i64, paths: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for path in paths {
            sqlx::query("DELETE FROM entries WHERE pair_id = ? AND path = ?")
                .bind(pair_id)
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Closes the pass: freshly equal mtimes become `synced`, then current
    /// mtimes rotate into the prior-state columns. One transaction.
    pub async fn finish_pass(&self, pair_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE entries SET synced = 1 \
             WHERE pair_id = ? AND exists_remote = 1 AND exists_local = 1 \
               AND local_mtime = remote_mtime AND synced = 0",
        )
        .bind(pair_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE entries SET \
                 remote_mtime_prev = COALESCE(remote_mtime, 0), \
                 local_mtime_prev = COALESCE(local_mtime, 0) \
             WHERE pair_id = ?",
        )
        .bind(pair_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
