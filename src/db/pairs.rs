use sqlx::Row;
use tracing::info;

use super::Database;
use crate::errors::{Result, SyncError};
use crate::models::{Pair, EXTENSION_WILDCARD};

impl Database {
    /// Registers a new sync pair. Extension tokens are normalized to
    /// lowercase with a leading dot; `.*` admits any extension.
    pub async fn create_pair(
        &self,
        remote_root: &str,
        local_root: &str,
        extensions: &[String],
    ) -> Result<Pair> {
        let normalized = normalize_extensions(extensions)?;
        if !std::path::Path::new(local_root).is_absolute() {
            return Err(SyncError::config(format!(
                "local root must be an absolute path, got '{}'",
                local_root
            )));
        }
        let remote_root = remote_root.trim_matches('/').to_string();

        let row = sqlx::query(
            r#"INSERT INTO pairs (remote_root, local_root, allowed_extensions)
               VALUES (?, ?, ?)
               RETURNING id"#,
        )
        .bind(&remote_root)
        .bind(local_root)
        .bind(normalized.join(","))
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        info!("registered pair {}: '{}' <-> {}", id, remote_root, local_root);

        Ok(Pair {
            id,
            remote_root,
            local_root: local_root.to_string(),
            allowed_extensions: normalized,
        })
    }

    pub async fn list_pairs(&self) -> Result<Vec<Pair>> {
        let rows = sqlx::query(
            "SELECT id, remote_root, local_root, allowed_extensions FROM pairs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Pair {
                id: row.get("id"),
                remote_root: row.get("remote_root"),
                local_root: row.get("local_root"),
                allowed_extensions: split_extensions(row.get("allowed_extensions")),
            })
            .collect())
    }

    pub async fn get_pair(&self, id: i64) -> Result<Option<Pair>> {
        let row = sqlx::query(
            "SELECT id, remote_root, local_root, allowed_extensions FROM pairs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Pair {
            id: row.get("id"),
            remote_root: row.get("remote_root"),
            local_root: row.get("local_root"),
            allowed_extensions: split_extensions(row.get("allowed_extensions")),
        }))
    }

    /// Removes a pair and every entry it owns, in one transaction.
    pub async fn delete_pair(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entries WHERE pair_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pairs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("deleted pair {} and its entries", id);
        Ok(())
    }
}

fn normalize_extensions(extensions: &[String]) -> Result<Vec<String>> {
    if extensions.is_empty() {
        return Err(SyncError::config(
            "a pair needs at least one extension or the .* wildcard",
        ));
    }
    let mut normalized = Vec::with_capacity(extensions.len());
    for token in extensions {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }
        if token == EXTENSION_WILDCARD {
            normalized.push(token);
        } else if let Some(stripped) = token.strip_prefix('.') {
            if stripped.is_empty() {
                return Err(SyncError::config("'.' is not a valid extension"));
            }
            normalized.push(token);
        } else {
            normalized.push(format!(".{}", token));
        }
    }
    Ok(normalized)
}

fn split_extensions(csv: String) -> Vec<String> {
    csv.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_normalizes_extensions() {
        let db = Database::open_in_memory().await.unwrap();
        let pair = db
            .create_pair(
                "/Docs/",
                "/tmp/p1",
                &["JPG".to_string(), ".Png".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(pair.remote_root, "Docs");
        assert_eq!(pair.allowed_extensions, vec![".jpg", ".png"]);

        let listed = db.list_pairs().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].allowed_extensions, vec![".jpg", ".png"]);
    }

    #[tokio::test]
    async fn test_create_rejects_relative_local_root() {
        let db = Database::open_in_memory().await.unwrap();
        let result = db
            .create_pair("Docs", "relative/dir", &[".*".to_string()])
            .await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_entries() {
        let db = Database::open_in_memory().await.unwrap();
        let pair = db
            .create_pair("Docs", "/tmp/p1", &[".*".to_string()])
            .await
            .unwrap();
        db.record_remote_snapshot(pair.id, &[("a.txt".to_string(), 1_700_000_000_000)], 1)
            .await
            .unwrap();
        assert!(db.get_entry(pair.id, "a.txt").await.unwrap().is_some());

        db.delete_pair(pair.id).await.unwrap();
        assert!(db.get_entry(pair.id, "a.txt").await.unwrap().is_none());
        assert!(db.list_pairs().await.unwrap().is_empty());
    }
}
