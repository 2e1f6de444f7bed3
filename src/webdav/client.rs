use reqwest::{Client, Method, Response};
use tracing::{debug, error, warn};

use crate::errors::{Result, SyncError};

use super::config::WebDAVConfig;

/// Fixed PROPFIND request body listing the properties the engine consumes.
const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getcontenttype/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

/// Authenticated WebDAV operations against one Nextcloud server.
///
/// Certificate validation is reqwest's default and is deliberately not
/// configurable: an untrusted certificate fails the request with
/// [`SyncError::TlsUntrusted`] and the host is logged.
#[derive(Clone)]
pub struct WebDAVClient {
    client: Client,
    config: WebDAVConfig,
}

impl WebDAVClient {
    pub fn new(config: WebDAVConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebDAVConfig {
        &self.config
    }

    /// Issues a PROPFIND with the given depth and returns the multistatus
    /// body. Any non-2xx status is an error carrying the status code.
    pub async fn propfind(&self, url: &str, depth: u32) -> Result<String> {
        debug!("PROPFIND depth {} on {}", depth, url);
        let response = self
            .client
            .request(Method::from_bytes(b"PROPFIND").unwrap(), url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let response = self.require_success(url, response)?;
        response
            .text()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))
    }

    /// Starts a download. The caller streams the body off the returned
    /// response to avoid buffering large files.
    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        self.require_success(url, response)
    }

    /// Uploads a whole file body. `mtime_seconds` rides along in
    /// `X-OC-MTime` so the server preserves the local modification time.
    pub async fn put(&self, url: &str, body: reqwest::Body, mtime_seconds: i64) -> Result<()> {
        debug!("PUT {} (X-OC-MTime: {})", url, mtime_seconds);
        let response = self
            .client
            .put(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("X-OC-MTime", mtime_seconds.to_string())
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        self.require_success(url, response)?;
        Ok(())
    }

    /// Deletes a resource. A 404 counts as success so deletion stays
    /// idempotent across retried passes.
    pub async fn delete(&self, url: &str) -> Result<()> {
        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if response.status().as_u16() == 404 {
            debug!("DELETE {} returned 404, already gone", url);
            return Ok(());
        }
        self.require_success(url, response)?;
        Ok(())
    }

    /// Probes the base URL and accepts the server iff it answers with an
    /// `X-Nextcloud-*` header or a body containing "nextcloud". The login
    /// page of an unauthenticated instance passes this check, so the probe
    /// ignores the status code.
    pub async fn check_server_identity(&self) -> Result<()> {
        let url = self.config.server_url();
        debug!("🔍 probing server identity at {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let header_match = response
            .headers()
            .keys()
            .any(|name| name.as_str().to_ascii_lowercase().starts_with("x-nextcloud"));
        if header_match {
            debug!("✅ server advertised an X-Nextcloud-* header");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        if body.to_lowercase().contains("nextcloud") {
            debug!("✅ server body mentions Nextcloud");
            return Ok(());
        }

        warn!("❌ {} does not look like a Nextcloud server", url);
        Err(SyncError::NotNextcloud)
    }

    fn request_error(&self, err: reqwest::Error) -> SyncError {
        let mapped = SyncError::from_request(&self.config.host(), err);
        if let SyncError::TlsUntrusted { host } = &mapped {
            error!("TLS certificate rejected for host '{}'", host);
        }
        mapped
    }

    fn require_success(&self, url: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> WebDAVClient {
        WebDAVClient::new(WebDAVConfig::new(
            server.uri(),
            "alice".to_string(),
            "secret".to_string(),
        ))
        .expect("client")
    }

    #[tokio::test]
    async fn test_propfind_sends_depth_and_prop_list() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/remote.php/dav/files/alice/Docs"))
            .and(header("Depth", "20"))
            .and(body_string_contains("<d:getlastmodified/>"))
            .respond_with(ResponseTemplate::new(207).set_body_string("<d:multistatus/>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let url = format!("{}/remote.php/dav/files/alice/Docs", server.uri());
        let body = client.propfind(&url, 20).await.expect("propfind");
        assert!(body.contains("multistatus"));
    }

    #[tokio::test]
    async fn test_delete_treats_404_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let url = format!("{}/remote.php/dav/files/alice/gone.txt", server.uri());
        assert!(client.delete(&url).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported_with_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let url = format!("{}/remote.php/dav/files/alice/a.txt", server.uri());
        match client.get(&url).await {
            Err(SyncError::HttpStatus { status, .. }) => assert_eq!(status, 503),
            other => panic!("expected HttpStatus, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_identity_check_accepts_header_and_body_matches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("X-Nextcloud-Well-Known", "1"),
            )
            .mount(&server)
            .await;
        let client = client_for(&server);
        assert!(client.check_server_identity().await.is_ok());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><title>Nextcloud</title></html>"),
            )
            .mount(&server)
            .await;
        let client = client_for(&server);
        assert!(client.check_server_identity().await.is_ok());
    }

    #[tokio::test]
    async fn test_identity_check_rejects_non_nextcloud() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>apache</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.check_server_identity().await {
            Err(SyncError::NotNextcloud) => {}
            other => panic!("expected NotNextcloud, got {:?}", other.map(|_| ())),
        }
    }
}
