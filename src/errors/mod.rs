use std::path::PathBuf;

use thiserror::Error;

/// Error kinds produced by the sync engine.
///
/// Fatal kinds (`NotNextcloud`, `NoPairs`, `Config`) abort the whole pass;
/// everything else is an action-level failure that is logged and retried on
/// the next invocation because the affected row keeps its "not yet in sync"
/// state.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("server did not identify itself as a Nextcloud instance")]
    NotNextcloud,

    #[error("TLS certificate for host '{host}' is not trusted")]
    TlsUntrusted { host: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed multistatus response: {0}")]
    DavXmlMalformed(String),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state store error: {0}")]
    StateStore(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no sync pairs configured")]
    NoPairs,

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Maps a reqwest failure onto the engine's error kinds. Certificate
    /// rejections must surface as their own kind so the caller can log the
    /// offending host; reqwest buries the TLS detail in its source chain,
    /// so the kind is recovered from the rendered chain.
    pub fn from_request(host: &str, err: reqwest::Error) -> Self {
        let rendered = format!("{err:?}").to_lowercase();
        if rendered.contains("certificate")
            || rendered.contains("unknownissuer")
            || rendered.contains("invalid peer")
        {
            return Self::TlsUntrusted {
                host: host.to_string(),
            };
        }
        Self::Network(err.to_string())
    }

    /// True for errors that abort the whole `sync()` pass rather than a
    /// single action.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotNextcloud | Self::NoPairs | Self::Config(_) | Self::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(SyncError::NotNextcloud.is_fatal());
        assert!(SyncError::NoPairs.is_fatal());
        assert!(SyncError::config("missing base url").is_fatal());
        assert!(!SyncError::Network("reset by peer".into()).is_fatal());
        assert!(!SyncError::HttpStatus {
            status: 503,
            url: "https://nc.example/".into()
        }
        .is_fatal());
    }
}
