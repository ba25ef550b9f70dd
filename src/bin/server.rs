use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use storely_transfer::api::{create_api_server, AppState};
use storely_transfer::config::TransferConfig;
use storely_transfer::metrics::install_recorder;
use storely_transfer::owner::OwnerProfile;
use storely_transfer::registry::{SqlitePersistence, TransferRegistry};
use storely_transfer::storage::HttpStorage;
use storely_transfer::transfer::{DownloadCoordinator, UploadCoordinator};
use tracing_subscriber::EnvFilter;

/// Usage: `storely-server [config.json]`
///
/// Without a config file, settings come from `STORELY_*` environment
/// variables. `STORELY_OWNER_PROFILE` may hold the owner profile JSON.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storely_transfer=info,tower_http=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TransferConfig::from_file(&PathBuf::from(&path))
            .with_context(|| format!("loading config from {path}"))?,
        None => TransferConfig::from_env().context("reading STORELY_* environment")?,
    };

    let owner = match std::env::var("STORELY_OWNER_PROFILE") {
        Ok(json) => OwnerProfile::from_json(&json).context("parsing STORELY_OWNER_PROFILE")?,
        Err(_) => OwnerProfile::anonymous(),
    };

    install_recorder().context("installing metrics recorder")?;

    let persistence = SqlitePersistence::new(&config.registry_db_url)
        .await
        .with_context(|| format!("opening registry database {}", config.registry_db_url))?;
    let registry = TransferRegistry::open(Arc::new(persistence), config.registry_capacity)
        .await
        .context("loading upload history")?;

    let storage = Arc::new(
        HttpStorage::new(&config.relay_base_url, &owner.user_id, config.request_timeout())
            .context("building HTTP client")?,
    );

    let uploads = UploadCoordinator::new(&config)?
        .with_relay(storage.clone())
        .with_direct(storage.clone())
        .with_registry(registry.clone())
        .with_owner(owner.clone());
    let downloads = DownloadCoordinator::new(storage.clone(), &config);

    let state = AppState::new(registry, storage, uploads, downloads)
        .with_upload_limit(config.max_upload_bytes);
    let app = create_api_server(state);

    let listener = tokio::net::TcpListener::bind(config.api_bind_addr)
        .await
        .with_context(|| format!("binding {}", config.api_bind_addr))?;

    tracing::info!(
        addr = %config.api_bind_addr,
        backend = %config.relay_base_url,
        owner = %owner.user_id,
        "storely server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
