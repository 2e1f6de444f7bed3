use crate::errors::{Result, SyncError};

/// Connection settings for one Nextcloud server.
#[derive(Debug, Clone)]
pub struct WebDAVConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
}

impl WebDAVConfig {
    pub fn new(base_url: String, username: String, password: String) -> Self {
        Self {
            base_url,
            username,
            password,
            // Folder listings on large trees can run long; transfers of a
            // single file stay well below this.
            timeout_seconds: 180,
        }
    }

    /// Normalizes a server URL by adding a protocol if missing. Prefers
    /// HTTPS; the certificate policy rejects anything untrusted anyway.
    pub fn normalize_server_url(url: &str) -> String {
        let trimmed = url.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.trim_end_matches('/').to_string();
        }
        format!("https://{}", trimmed.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::config("server URL cannot be empty"));
        }
        if self.username.is_empty() {
            return Err(SyncError::config("username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(SyncError::config("password cannot be empty"));
        }
        let without_protocol = Self::normalize_server_url(&self.base_url)
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();
        if without_protocol.is_empty() {
            return Err(SyncError::config(
                "server URL must contain a valid domain or IP address",
            ));
        }
        if without_protocol.contains("://") {
            return Err(SyncError::config(
                "invalid URL format: contains multiple protocols",
            ));
        }
        Ok(())
    }

    /// The normalized base URL (no trailing slash, protocol present).
    pub fn server_url(&self) -> String {
        Self::normalize_server_url(&self.base_url)
    }

    /// Host portion of the base URL, used when logging TLS rejections.
    pub fn host(&self) -> String {
        let url = self.server_url();
        let without_protocol = url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        without_protocol
            .split('/')
            .next()
            .unwrap_or(without_protocol)
            .to_string()
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WebDAVConfig {
        WebDAVConfig::new(
            "https://nc.example/".to_string(),
            "alice".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn test_normalize_server_url_adds_https() {
        assert_eq!(
            WebDAVConfig::normalize_server_url("nc.example"),
            "https://nc.example"
        );
        assert_eq!(
            WebDAVConfig::normalize_server_url("http://nc.example/"),
            "http://nc.example"
        );
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut c = config();
        c.password = String::new();
        assert!(c.validate().is_err());

        let mut c = config();
        c.base_url = "  ".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(config().host(), "nc.example");
        let c = WebDAVConfig::new(
            "http://192.168.1.4:8080/cloud".to_string(),
            "u".to_string(),
            "p".to_string(),
        );
        assert_eq!(c.host(), "192.168.1.4:8080");
    }
}
