//! parlor: SFU conference server.

mod server;
mod ws;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use parlor_core::lobby::LobbySignaling;
use parlor_core::logging;
use parlor_core::registry::RoomRegistry;
use parlor_core::Config;

use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("PARLOR_CONFIG").ok();
    let config = Arc::new(Config::load(config_path.as_deref().map(Path::new))?);

    logging::init_logging(&config.logging)?;

    let lobby = LobbySignaling::new(config.lobby.clone());
    let registry = RoomRegistry::new(config.room.clone(), lobby.notifier());
    Arc::clone(&lobby).start(Arc::clone(&registry));

    let state = AppState {
        config: Arc::clone(&config),
        registry,
        lobby,
    };

    let address = config.http_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "conference server listening");

    axum::serve(listener, server::router(state)).await?;
    Ok(())
}
