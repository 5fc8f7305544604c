//! CLI command implementations.
//!
//! | Module    | Commands handled          |
//! |-----------|---------------------------|
//! | `serve`   | `Serve`                   |
//! | `orders`  | `Orders`                  |
//! | `browse`  | `Search`, `Events`        |
//! | `agent`   | `Ask`                     |
//! | `config`  | `Config`                  |

pub mod agent;
pub mod browse;
pub mod config;
pub mod orders;
pub mod serve;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use orderdesk::blob::{AzureBlobStore, BlobStore, LocalBlobStore};
use orderdesk::config::Settings;
use orderdesk::server::AppState;
use orderdesk::store::SqliteDatabase;

pub use agent::cmd_ask;
pub use browse::{cmd_events, cmd_search};
pub use config::cmd_config;
pub use orders::cmd_orders;
pub use serve::cmd_serve;

/// Container used when blobs are kept on local disk.
const LOCAL_CONTAINER: &str = "documents";

pub fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

/// Open the store and blob backend named by `settings` and wire the desks.
pub fn open_state(settings: &Settings) -> Result<Arc<AppState>> {
    let db = SqliteDatabase::open(&settings.db_path)
        .with_context(|| format!("Failed to open store {}", settings.db_path.display()))?;

    let (blobs, container): (Arc<dyn BlobStore>, String) = match &settings.blob {
        Some(blob) => (
            Arc::new(
                AzureBlobStore::new(&blob.connection_string)
                    .context("Invalid BLOB_CONN connection string")?,
            ),
            blob.container.clone(),
        ),
        None => (
            Arc::new(LocalBlobStore::new(settings.blob_dir.clone())),
            LOCAL_CONTAINER.to_string(),
        ),
    };

    Ok(Arc::new(AppState::new(
        Arc::new(db),
        settings.dashboard.clone(),
        blobs,
        container,
    )))
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
