use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::errors::{Result, SyncError};
use crate::models::LoginCredentials;

/// Credential keys the external secure store must answer.
pub const KEY_USERNAME: &str = "username";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_BASE_URL: &str = "baseUrl";

/// Contract of the external secure credential store: string read/write for
/// the three keys above, absence reads as the empty string. The engine
/// never persists credentials itself.
pub trait CredentialStore: Send + Sync {
    fn read(&self, key: &str) -> String;
    fn write(&self, key: &str, value: &str);
}

/// Credential store backed by environment variables; the write side only
/// affects this process. Suits CLI usage where a wrapping shell or secret
/// manager injects the values.
#[derive(Debug, Default)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    fn var_for(key: &str) -> Option<&'static str> {
        match key {
            KEY_USERNAME => Some("NEXTCLOUD_USERNAME"),
            KEY_PASSWORD => Some("NEXTCLOUD_PASSWORD"),
            KEY_BASE_URL => Some("NEXTCLOUD_BASE_URL"),
            _ => None,
        }
    }
}

impl CredentialStore for EnvCredentialStore {
    fn read(&self, key: &str) -> String {
        Self::var_for(key)
            .and_then(|var| env::var(var).ok())
            .unwrap_or_default()
    }

    fn write(&self, key: &str, value: &str) {
        if let Some(var) = Self::var_for(key) {
            env::set_var(var, value);
        }
    }
}

/// In-memory store for tests and for holding freshly imported login
/// payloads before they are handed to a platform keychain.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn read(&self, key: &str) -> String {
        self.values
            .lock()
            .map(|values| values.get(key).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn write(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

/// Runtime configuration of the synchronizer.
#[derive(Clone, Debug)]
pub struct Config {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Directory holding the state store file.
    pub data_dir: PathBuf,
}

impl Config {
    /// Loads configuration from the environment (a `.env` file is honored).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_store(&EnvCredentialStore)
    }

    /// Builds the configuration from an injected credential accessor.
    /// Missing credentials are a fatal configuration error before any
    /// sync work starts.
    pub fn from_store(store: &dyn CredentialStore) -> Result<Self> {
        let base_url = store.read(KEY_BASE_URL);
        let username = store.read(KEY_USERNAME);
        let password = store.read(KEY_PASSWORD);

        if base_url.is_empty() {
            return Err(SyncError::config("server base URL is not configured"));
        }
        if username.is_empty() || password.is_empty() {
            return Err(SyncError::config("username/password are not configured"));
        }

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(Config {
            base_url,
            username,
            password,
            data_dir,
        })
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join(crate::db::STATE_DB_FILENAME)
    }
}

/// Parses the payload of a Nextcloud login QR code:
/// `nc://login/user:<u>&password:<p>&server:<url>`. Fields are split on
/// `&`, each on its first `:`; unknown keys are ignored.
pub fn parse_login_uri(uri: &str) -> Result<LoginCredentials> {
    let rest = uri
        .strip_prefix("nc://login/")
        .ok_or_else(|| SyncError::config(format!("not a nc://login/ URI: '{}'", uri)))?;

    let mut username = String::new();
    let mut password = String::new();
    let mut server_url = String::new();

    for field in rest.split('&') {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        match key {
            "user" => username = value.to_string(),
            "password" => password = value.to_string(),
            "server" => server_url = value.to_string(),
            _ => {}
        }
    }

    if username.is_empty() || password.is_empty() || server_url.is_empty() {
        return Err(SyncError::config("login URI is missing a field"));
    }

    Ok(LoginCredentials {
        username,
        password,
        server_url,
    })
}

/// Writes a parsed login payload into the credential store.
pub fn import_login(store: &dyn CredentialStore, uri: &str) -> Result<LoginCredentials> {
    let credentials = parse_login_uri(uri)?;
    store.write(KEY_USERNAME, &credentials.username);
    store.write(KEY_PASSWORD, &credentials.password);
    store.write(KEY_BASE_URL, &credentials.server_url);
    Ok(credentials)
}
