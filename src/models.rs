use std::path::Path;

use serde::{Deserialize, Serialize};

/// Wildcard token that admits every extension.
pub const EXTENSION_WILDCARD: &str = ".*";

/// One sync configuration: a remote folder tree mirrored into a local
/// directory, restricted to an extension allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub id: i64,
    /// Slash-separated path below the user's DAV root; empty means the
    /// user root itself.
    pub remote_root: String,
    /// Absolute local directory.
    pub local_root: String,
    /// Lowercase extensions with leading dot, or the single `.*` wildcard.
    pub allowed_extensions: Vec<String>,
}

impl Pair {
    /// Applies the pair's extension allowlist to a relative path.
    pub fn allows(&self, relative_path: &str) -> bool {
        if self
            .allowed_extensions
            .iter()
            .any(|e| e == EXTENSION_WILDCARD)
        {
            return true;
        }
        match Path::new(relative_path).extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_lowercase());
                self.allowed_extensions.iter().any(|e| *e == dotted)
            }
            None => false,
        }
    }
}

/// The engine's knowledge of one file at one logical location. One row per
/// `(pair_id, path)` in the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub pair_id: i64,
    /// Pair-root-relative forward-slash path, percent-decoded.
    pub path: String,
    /// Current remote last-modified, UTC ms, if observed.
    pub remote_mtime: Option<i64>,
    /// Remote mtime at the end of the last successful pass; 0 = never.
    pub remote_mtime_prev: i64,
    pub exists_remote: bool,
    /// Current local last-modified, UTC ms truncated to whole seconds.
    pub local_mtime: Option<i64>,
    /// Local mtime at the end of the last successful pass; 0 = never.
    pub local_mtime_prev: i64,
    pub exists_local: bool,
    /// True once the engine has confirmed both sides in sync.
    pub synced: bool,
    /// Wall-clock ms at which the snapshot cycle began.
    pub captured_at: i64,
}

/// One resource record parsed out of a PROPFIND multistatus response.
#[derive(Debug, Clone)]
pub struct RemoteFileInfo {
    /// The `<d:href>` value verbatim (percent-encoded server path).
    pub remote_url: String,
    /// User-root-relative decoded path derived from the href.
    pub relative_path: String,
    pub display_name: String,
    pub is_folder: bool,
    pub content_length: i64,
    pub content_type: String,
    /// `<d:getlastmodified>` as UTC ms.
    pub remote_mtime_ms: i64,
}

/// Action assigned to an entry by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Conflict,
    Download,
    Upload,
    DeleteRemote,
    DeleteLocal,
    NoOp,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncAction::Conflict => "conflict",
            SyncAction::Download => "download",
            SyncAction::Upload => "upload",
            SyncAction::DeleteRemote => "delete-remote",
            SyncAction::DeleteLocal => "delete-local",
            SyncAction::NoOp => "no-op",
        };
        write!(f, "{}", name)
    }
}

/// Summary of one completed `sync()` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub pairs_processed: usize,
    pub files_downloaded: usize,
    pub files_uploaded: usize,
    pub files_deleted_remote: usize,
    pub files_deleted_local: usize,
    pub conflicts_preserved: usize,
    /// Individual action failures; these never flip the pass result.
    pub failed_actions: usize,
    pub duration_ms: u64,
}

/// Credentials carried by a `nc://login/` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub server_url: String,
}
