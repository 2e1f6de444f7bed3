//! The per-pair sync engine: snapshot both sides, then run the phases
//! (conflict, download, upload, delete-remote, delete-local) strictly in
//! order, each phase pushing its I/O through a bounded semaphore and
//! committing its state-store mutations in one transaction.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier;
use crate::db::{Database, STATE_DB_FILENAME};
use crate::errors::{Result, SyncError};
use crate::models::{Entry, Pair, SyncAction, SyncSummary};
use crate::snapshot;
use crate::webdav::{paths, WebDAVClient};

/// Parallel I/O tasks per phase. Sized to stay polite toward home-hosted
/// instances; raising it past the server's connection limit backfires.
pub const MAX_CONCURRENT_TRANSFERS: usize = 10;

/// Drives complete sync passes over every registered pair.
#[derive(Clone)]
pub struct SyncService {
    db: Database,
    client: WebDAVClient,
}

impl SyncService {
    pub fn new(db: Database, client: WebDAVClient) -> Self {
        Self { db, client }
    }

    /// One full pass: server identity check, then every pair in sequence.
    /// Per-file failures are counted in the summary and retried next pass;
    /// only the identity check, an empty pair list, or cancellation fail
    /// the pass itself.
    pub async fn sync(&self) -> Result<SyncSummary> {
        self.sync_with_cancellation(CancellationToken::new()).await
    }

    pub async fn sync_with_cancellation(&self, token: CancellationToken) -> Result<SyncSummary> {
        let started = Instant::now();

        self.client.check_server_identity().await?;

        let pairs = self.db.list_pairs().await?;
        if pairs.is_empty() {
            return Err(SyncError::NoPairs);
        }

        let captured_at = Utc::now().timestamp_millis();
        let mut summary = SyncSummary::default();

        for pair in &pairs {
            if token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            info!(
                "🔄 syncing pair {} ('{}' <-> {})",
                pair.id, pair.remote_root, pair.local_root
            );
            match self.sync_pair(pair, captured_at, &token, &mut summary).await {
                Ok(()) => summary.pairs_processed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // A pair whose snapshots or commits fail is skipped
                    // whole; its rows still hold the previous pass.
                    error!("pair {} failed, will retry next pass: {}", pair.id, e);
                    summary.failed_actions += 1;
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "✅ sync finished: {} pairs, {} down, {} up, {} deleted remote, {} deleted local, {} conflicts kept, {} failures in {} ms",
            summary.pairs_processed,
            summary.files_downloaded,
            summary.files_uploaded,
            summary.files_deleted_remote,
            summary.files_deleted_local,
            summary.conflicts_preserved,
            summary.failed_actions,
            summary.duration_ms
        );
        Ok(summary)
    }

    async fn sync_pair(
        &self,
        pair: &Pair,
        captured_at: i64,
        token: &CancellationToken,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        self.db.begin_pass(pair.id, captured_at).await?;

        // A failed remote snapshot must abort the pair: with every
        // exists_remote flag cleared, continuing would read as a full
        // remote deletion.
        snapshot::collect_remote(&self.client, &self.db, pair, captured_at).await?;
        snapshot::collect_local(&self.db, pair, captured_at).await?;

        self.log_plan(pair).await?;
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (conflicts, failed) = self.conflict_phase(pair, captured_at).await?;
        summary.conflicts_preserved += conflicts;
        summary.failed_actions += failed;
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (done, failed) = self.download_phase(pair, token).await?;
        summary.files_downloaded += done;
        summary.failed_actions += failed;
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (done, failed) = self.upload_phase(pair, token).await?;
        summary.files_uploaded += done;
        summary.failed_actions += failed;
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (done, failed) = self.delete_remote_phase(pair, token).await?;
        summary.files_deleted_remote += done;
        summary.failed_actions += failed;
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (done, failed) = self.delete_local_phase(pair, token).await?;
        summary.files_deleted_local += done;
        summary.failed_actions += failed;

        self.db.finish_pass(pair.id).await?;
        Ok(())
    }

    /// Logs the per-action breakdown the pure classifier derives from the
    /// freshly merged snapshot.
    async fn log_plan(&self, pair: &Pair) -> Result<()> {
        let entries = self.db.entries_for_pair(pair.id).await?;
        let mut tally: HashMap<SyncAction, usize> = HashMap::new();
        for entry in &entries {
            *tally.entry(classifier::classify(entry)).or_default() += 1;
        }
        info!(
            "pair {} plan: {} conflicts, {} downloads, {} uploads, {} delete-remote, {} delete-local, {} in sync",
            pair.id,
            tally.get(&SyncAction::Conflict).copied().unwrap_or(0),
            tally.get(&SyncAction::Download).copied().unwrap_or(0),
            tally.get(&SyncAction::Upload).copied().unwrap_or(0),
            tally.get(&SyncAction::DeleteRemote).copied().unwrap_or(0),
            tally.get(&SyncAction::DeleteLocal).copied().unwrap_or(0),
            tally.get(&SyncAction::NoOp).copied().unwrap_or(0),
        );
        Ok(())
    }

    /// Phase 1: both sides changed since the last pass. The local file is
    /// copied to a timestamped conflict name and the copy registered as a
    /// fresh local observation; the original path then reads as an
    /// ordinary stale copy and downloads in the next phase. Must commit
    /// before the download phase selects its work.
    async fn conflict_phase(&self, pair: &Pair, captured_at: i64) -> Result<(usize, usize)> {
        let entries = self
            .db
            .select_for_action(pair.id, SyncAction::Conflict)
            .await?;
        if entries.is_empty() {
            return Ok((0, 0));
        }
        info!(
            "⚠️  pair {}: preserving {} conflicting local edits",
            pair.id,
            entries.len()
        );

        let mut copies = Vec::new();
        let mut failed = 0;
        for entry in &entries {
            if entry.path.ends_with(STATE_DB_FILENAME) {
                debug!("not conflict-copying the state store file itself");
                continue;
            }
            match materialize_conflict_copy(pair, &entry.path).await {
                Ok(copy) => copies.push(copy),
                Err(e) => {
                    warn!("conflict copy of '{}' failed: {}", entry.path, e);
                    failed += 1;
                }
            }
        }

        self.db
            .commit_conflict_copies(pair.id, &copies, captured_at)
            .await?;
        Ok((copies.len(), failed))
    }

    async fn download_phase(&self, pair: &Pair, token: &CancellationToken) -> Result<(usize, usize)> {
        let entries = self
            .db
            .select_for_action(pair.id, SyncAction::Download)
            .await?;
        if entries.is_empty() {
            return Ok((0, 0));
        }
        info!("⬇️  pair {}: downloading {} files", pair.id, entries.len());

        let (results, failed) = self
            .run_phase(entries, token, |entry| {
                let client = self.client.clone();
                let pair = pair.clone();
                async move {
                    let mtime = download_one(&client, &pair, &entry).await?;
                    Ok((entry.path, mtime))
                }
            })
            .await?;

        self.db.commit_downloads(pair.id, &results).await?;
        Ok((results.len(), failed))
    }

    async fn upload_phase(&self, pair: &Pair, token: &CancellationToken) -> Result<(usize, usize)> {
        let entries = self
            .db
            .select_for_action(pair.id, SyncAction::Upload)
            .await?;
        if entries.is_empty() {
            return Ok((0, 0));
        }
        info!("⬆️  pair {}: uploading {} files", pair.id, entries.len());

        let (results, failed) = self
            .run_phase(entries, token, |entry| {
                let client = self.client.clone();
                let pair = pair.clone();
                async move {
                    let mtime = upload_one(&client, &pair, &entry.path).await?;
                    Ok((entry.path, mtime))
                }
            })
            .await?;

        self.db.commit_uploads(pair.id, &results).await?;
        Ok((results.len(), failed))
    }

    async fn delete_remote_phase(
        &self,
        pair: &Pair,
        token: &CancellationToken,
    ) -> Result<(usize, usize)> {
        let entries = self
            .db
            .select_for_action(pair.id, SyncAction::DeleteRemote)
            .await?;
        if entries.is_empty() {
            return Ok((0, 0));
        }
        info!(
            "🗑️  pair {}: deleting {} remote files",
            pair.id,
            entries.len()
        );

        let (results, failed) = self
            .run_phase(entries, token, |entry| {
                let client = self.client.clone();
                let pair = pair.clone();
                async move {
                    let url = remote_url_of(&client, &pair, &entry.path);
                    client.delete(&url).await?;
                    Ok(entry.path)
                }
            })
            .await?;

        self.db.commit_drops(pair.id, &results).await?;
        Ok((results.len(), failed))
    }

    async fn delete_local_phase(
        &self,
        pair: &Pair,
        token: &CancellationToken,
    ) -> Result<(usize, usize)> {
        let entries = self
            .db
            .select_for_action(pair.id, SyncAction::DeleteLocal)
            .await?;
        if entries.is_empty() {
            return Ok((0, 0));
        }
        info!(
            "🗑️  pair {}: removing {} local files the remote dropped",
            pair.id,
            entries.len()
        );

        let (results, failed) = self
            .run_phase(entries, token, |entry| {
                let pair = pair.clone();
                async move {
                    delete_local_one(&pair, &entry.path).await?;
                    Ok(entry.path)
                }
            })
            .await?;

        self.db.commit_drops(pair.id, &results).await?;
        Ok((results.len(), failed))
    }

    /// Pipes one phase's entries through the transfer semaphore. Failures
    /// are logged and counted, never propagated: the untouched row retries
    /// on the next pass. Cancellation drops all in-flight work before any
    /// of it is committed.
    async fn run_phase<T, F, Fut>(
        &self,
        entries: Vec<Entry>,
        token: &CancellationToken,
        worker: F,
    ) -> Result<(Vec<T>, usize)>
    where
        F: Fn(Entry) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TRANSFERS));
        let mut tasks = FuturesUnordered::new();
        for entry in entries {
            let semaphore = semaphore.clone();
            let path = entry.path.clone();
            let work = worker(entry);
            tasks.push(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => work.await,
                    Err(_) => Err(SyncError::Cancelled),
                };
                (path, result)
            });
        }

        let mut results = Vec::new();
        let mut failed = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(SyncError::Cancelled),
                next = tasks.next() => match next {
                    Some((_, Ok(value))) => results.push(value),
                    Some((path, Err(e))) => {
                        warn!("action on '{}' failed: {}", path, e);
                        failed += 1;
                    }
                    None => break,
                },
            }
        }
        Ok((results, failed))
    }
}

fn remote_url_of(client: &WebDAVClient, pair: &Pair, relative: &str) -> String {
    let config = client.config();
    paths::relative_to_url(
        &config.server_url(),
        &config.username,
        &pair.remote_root,
        relative,
    )
}

/// GET into a temporary sibling, stamp the server mtime, then move into
/// place. Returns the mtime (ms) recorded for the local replica.
async fn download_one(client: &WebDAVClient, pair: &Pair, entry: &Entry) -> Result<i64> {
    let remote_mtime = entry
        .remote_mtime
        .ok_or_else(|| SyncError::Network(format!("no remote mtime recorded for '{}'", entry.path)))?;

    let url = remote_url_of(client, pair, &entry.path);
    let response = client.get(&url).await?;

    let local_path = paths::local_path_for(&pair.local_root, &entry.path);
    let parent = local_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&pair.local_root));
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| SyncError::filesystem(&parent, e))?;

    let temp_path = parent.join(format!(".{}.part", Uuid::new_v4()));
    let write_result = stream_to_file(response, &temp_path).await;
    if let Err(e) = write_result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    filetime::set_file_mtime(
        &temp_path,
        filetime::FileTime::from_unix_time(remote_mtime / 1000, 0),
    )
    .map_err(|e| SyncError::filesystem(&temp_path, e))?;

    tokio::fs::rename(&temp_path, &local_path)
        .await
        .map_err(|e| SyncError::filesystem(&local_path, e))?;

    debug!("downloaded '{}' (mtime {})", entry.path, remote_mtime);
    Ok(remote_mtime)
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| SyncError::filesystem(path, e))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SyncError::Network(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::filesystem(path, e))?;
    }
    file.flush().await.map_err(|e| SyncError::filesystem(path, e))?;
    Ok(())
}

/// PUT the local bytes with `X-OC-MTime` carrying the (second-truncated)
/// local mtime. Returns that mtime in ms for the state store.
async fn upload_one(client: &WebDAVClient, pair: &Pair, relative: &str) -> Result<i64> {
    let local_path = paths::local_path_for(&pair.local_root, relative);
    let metadata = tokio::fs::metadata(&local_path)
        .await
        .map_err(|e| SyncError::filesystem(&local_path, e))?;
    let modified = metadata
        .modified()
        .map_err(|e| SyncError::filesystem(&local_path, e))?;
    let mtime_ms = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let mtime_ms = snapshot::truncate_to_seconds(mtime_ms);

    let file = tokio::fs::File::open(&local_path)
        .await
        .map_err(|e| SyncError::filesystem(&local_path, e))?;
    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

    let url = remote_url_of(client, pair, relative);
    client.put(&url, body, mtime_ms / 1000).await?;

    debug!("uploaded '{}' (mtime {})", relative, mtime_ms);
    Ok(mtime_ms)
}

async fn delete_local_one(pair: &Pair, relative: &str) -> Result<()> {
    let local_path = paths::local_path_for(&pair.local_root, relative);
    match tokio::fs::remove_file(&local_path).await {
        Ok(()) => Ok(()),
        // Already gone: the point of the action is the absence.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::filesystem(&local_path, e)),
    }
}

/// Copies the locally edited file to `<stem>_conflict_<timestamp><ext>` in
/// its directory. Never overwrites an existing file; the copy's own mtime
/// (second-truncated) is what gets registered as the fresh observation.
async fn materialize_conflict_copy(pair: &Pair, relative: &str) -> Result<(String, i64)> {
    let local_path = paths::local_path_for(&pair.local_root, relative);

    let stem = local_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let extension = local_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let conflict_name = format!("{}_conflict_{}{}", stem, timestamp, extension);
    let target = local_path.with_file_name(&conflict_name);

    let already_there = tokio::fs::try_exists(&target)
        .await
        .map_err(|e| SyncError::filesystem(&target, e))?;
    if already_there {
        return Err(SyncError::filesystem(
            &target,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "conflict target already exists",
            ),
        ));
    }

    tokio::fs::copy(&local_path, &target)
        .await
        .map_err(|e| SyncError::filesystem(&local_path, e))?;

    let modified = tokio::fs::metadata(&target)
        .await
        .and_then(|m| m.modified())
        .map_err(|e| SyncError::filesystem(&target, e))?;
    let mtime_ms = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let mtime_ms = snapshot::truncate_to_seconds(mtime_ms);

    let conflict_relative = match relative.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, conflict_name),
        None => conflict_name,
    };

    info!(
        "preserved conflicting edit of '{}' as '{}'",
        relative, conflict_relative
    );
    Ok((conflict_relative, mtime_ms))
}
