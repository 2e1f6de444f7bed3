use anyhow::Result;
use tracing::error;

use nextcloud_dav_sync::config::{import_login, Config, EnvCredentialStore};
use nextcloud_dav_sync::db::Database;
use nextcloud_dav_sync::{build_service, webdav};

const USAGE: &str = "\
nextcloud-dav-sync <command>

Commands:
  sync                                    run one sync pass over all pairs
  check                                   probe the configured server
  pairs list                              show registered sync pairs
  pairs add <remote> <local> <exts>       register a pair (exts: .jpg,.png or .*)
  pairs remove <id>                       delete a pair and its state
  browse [remote-path]                    list remote subfolders
  import-login <nc://login/...>           store credentials from a login QR payload
";

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command: Vec<&str> = args.iter().map(String::as_str).collect();

    match command.as_slice() {
        [] | ["sync"] => run_sync().await,
        ["check"] => run_check().await,
        ["pairs", "list"] => pairs_list().await,
        ["pairs", "add", remote, local, extensions] => pairs_add(remote, local, extensions).await,
        ["pairs", "remove", id] => pairs_remove(id).await,
        ["browse"] => browse("").await,
        ["browse", remote_path] => browse(remote_path).await,
        ["import-login", uri] => {
            let store = EnvCredentialStore;
            let credentials = import_login(&store, uri)?;
            println!(
                "stored credentials for {} at {}",
                credentials.username, credentials.server_url
            );
            Ok(())
        }
        _ => {
            eprint!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

async fn run_sync() -> Result<()> {
    let config = Config::from_env()?;
    let service = build_service(&config).await?;
    match service.sync().await {
        Ok(summary) => {
            println!(
                "sync finished: {} pairs, {} downloaded, {} uploaded, {} deleted ({} remote / {} local), {} conflicts preserved, {} failures",
                summary.pairs_processed,
                summary.files_downloaded,
                summary.files_uploaded,
                summary.files_deleted_remote + summary.files_deleted_local,
                summary.files_deleted_remote,
                summary.files_deleted_local,
                summary.conflicts_preserved,
                summary.failed_actions
            );
            Ok(())
        }
        Err(e) => {
            error!("sync failed: {}", e);
            Err(e.into())
        }
    }
}

async fn run_check() -> Result<()> {
    let config = Config::from_env()?;
    let client = webdav::WebDAVClient::new(webdav::WebDAVConfig::new(
        config.base_url.clone(),
        config.username.clone(),
        config.password.clone(),
    ))?;
    client.check_server_identity().await?;
    println!("{} answers as a Nextcloud server", config.base_url);
    Ok(())
}

async fn open_db() -> Result<Database> {
    let config = Config::from_env()?;
    Ok(Database::open(&config.state_db_path()).await?)
}

async fn pairs_list() -> Result<()> {
    let db = open_db().await?;
    let pairs = db.list_pairs().await?;
    if pairs.is_empty() {
        println!("no pairs configured");
        return Ok(());
    }
    for pair in pairs {
        println!(
            "{:>4}  '{}' <-> {}  [{}]",
            pair.id,
            pair.remote_root,
            pair.local_root,
            pair.allowed_extensions.join(",")
        );
    }
    Ok(())
}

async fn pairs_add(remote: &str, local: &str, extensions: &str) -> Result<()> {
    let db = open_db().await?;
    let extensions: Vec<String> = extensions.split(',').map(|s| s.to_string()).collect();
    let pair = db.create_pair(remote, local, &extensions).await?;
    println!("created pair {}", pair.id);
    Ok(())
}

async fn browse(remote_path: &str) -> Result<()> {
    let config = Config::from_env()?;
    let client = webdav::WebDAVClient::new(webdav::WebDAVConfig::new(
        config.base_url.clone(),
        config.username.clone(),
        config.password.clone(),
    ))?;
    let folders = nextcloud_dav_sync::snapshot::list_remote_folders(&client, remote_path).await?;
    if folders.is_empty() {
        println!("(no subfolders)");
    }
    for folder in folders {
        println!("{}", folder);
    }
    Ok(())
}

async fn pairs_remove(id: &str) -> Result<()> {
    let id: i64 = id.parse()?;
    let db = open_db().await?;
    db.delete_pair(id).await?;
    println!("removed pair {}", id);
    Ok(())
}
