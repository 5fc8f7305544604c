//! Dashboard server command: `orderdesk serve`.

use anyhow::Result;
use orderdesk::config::Settings;
use orderdesk::server::{ServerConfig, start_server};

pub async fn cmd_serve(settings: &Settings, host: String, port: u16, cors: bool) -> Result<()> {
    let state = super::open_state(settings)?;
    tracing::info!(
        db = %settings.db_path.display(),
        agent = %settings.dashboard.agent.endpoint,
        azure_blobs = settings.blob.is_some(),
        "starting order desk"
    );
    start_server(
        ServerConfig {
            host,
            port,
            permissive_cors: cors,
        },
        state,
    )
    .await
}
