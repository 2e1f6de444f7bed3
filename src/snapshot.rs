//! Snapshot collectors: one PROPFIND sweep of the pair's remote tree and
//! one walk of its local root, both filtered by the pair's extension
//! allowlist and recorded through the state store's observe upserts.

use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::db::Database;
use crate::errors::Result;
use crate::models::Pair;
use crate::webdav::{paths, WebDAVClient};
use crate::webdav_xml_parser::parse_propfind_response;

/// Depth for the single recursive PROPFIND per pair. Deep enough for any
/// sane folder layout without asking the server for `infinity`, which many
/// instances refuse.
const PROPFIND_DEPTH: u32 = 20;

/// Collects the remote side of a pair. Folders are dropped, the extension
/// filter applies, and every surviving record lands as a remote
/// observation. Returns the number of files observed.
pub async fn collect_remote(
    client: &WebDAVClient,
    db: &Database,
    pair: &Pair,
    captured_at: i64,
) -> Result<usize> {
    let config = client.config();
    let root_url = paths::relative_to_url(
        &config.server_url(),
        &config.username,
        &pair.remote_root,
        "",
    );
    let xml = client.propfind(&root_url, PROPFIND_DEPTH).await?;
    let records = parse_propfind_response(&xml)?;

    let mut observations = Vec::new();
    for record in records {
        if record.is_folder {
            continue;
        }
        let Some(relative) = paths::pair_relative(&pair.remote_root, &record.relative_path) else {
            debug!(
                "ignoring '{}': outside pair root '{}'",
                record.relative_path, pair.remote_root
            );
            continue;
        };
        if !pair.allows(&relative) {
            continue;
        }
        observations.push((relative, record.remote_mtime_ms));
    }

    db.record_remote_snapshot(pair.id, &observations, captured_at)
        .await?;
    debug!(
        "remote snapshot of pair {}: {} files",
        pair.id,
        observations.len()
    );
    Ok(observations.len())
}

/// Collects the local side of a pair by walking its root. Directory
/// entries are never recorded; local mtimes are truncated to whole seconds
/// before storage because that is all the WebDAV side can express.
pub async fn collect_local(db: &Database, pair: &Pair, captured_at: i64) -> Result<usize> {
    let root = Path::new(&pair.local_root);
    if !root.is_dir() {
        warn!(
            "local root {} of pair {} does not exist, treating as empty",
            pair.local_root, pair.id
        );
        db.record_local_snapshot(pair.id, &[], captured_at).await?;
        return Ok(0);
    }

    let mut observations = Vec::new();
    for dir_entry in WalkDir::new(root) {
        let dir_entry = match dir_entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable path under {}: {}", pair.local_root, e);
                continue;
            }
        };
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = paths::relative_of_local(root, dir_entry.path()) else {
            continue;
        };
        if !pair.allows(&relative) {
            continue;
        }
        let mtime = match file_mtime_ms(dir_entry.path()) {
            Some(m) => m,
            None => {
                warn!("skipping {}: unreadable mtime", dir_entry.path().display());
                continue;
            }
        };
        observations.push((relative, truncate_to_seconds(mtime)));
    }

    db.record_local_snapshot(pair.id, &observations, captured_at)
        .await?;
    debug!(
        "local snapshot of pair {}: {} files",
        pair.id,
        observations.len()
    );
    Ok(observations.len())
}

/// Lists the immediate subfolders of a remote path, for interactive pair
/// creation. This is why the parser keeps collection records around.
pub async fn list_remote_folders(
    client: &WebDAVClient,
    remote_path: &str,
) -> Result<Vec<String>> {
    let config = client.config();
    let url = paths::relative_to_url(&config.server_url(), &config.username, remote_path, "");
    let xml = client.propfind(&url, 1).await?;
    let records = parse_propfind_response(&xml)?;

    Ok(records
        .into_iter()
        .filter(|r| r.is_folder)
        .filter_map(|r| paths::pair_relative(remote_path, &r.relative_path))
        .collect())
}

/// Truncates a millisecond timestamp to whole-second precision, matching
/// the second granularity of WebDAV's Last-Modified header.
pub fn truncate_to_seconds(mtime_ms: i64) -> i64 {
    (mtime_ms / 1000) * 1000
}

fn file_mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}
