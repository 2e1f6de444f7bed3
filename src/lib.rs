pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod snapshot;
pub mod sync;
pub mod webdav;
pub mod webdav_xml_parser;

use config::Config;
use db::Database;
use errors::Result;
use sync::SyncService;
use webdav::{WebDAVClient, WebDAVConfig};

/// Wires the state store and the WebDAV client into a ready sync service.
pub async fn build_service(config: &Config) -> Result<SyncService> {
    let db = Database::open(&config.state_db_path()).await?;
    let client = WebDAVClient::new(WebDAVConfig::new(
        config.base_url.clone(),
        config.username.clone(),
        config.password.clone(),
    ))?;
    Ok(SyncService::new(db, client))
}
