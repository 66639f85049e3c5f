//! Aura gateway: serves one workspace session to the browser front end.
//! Bare metal, sled store under `AURA_STORE_PATH`, chat via an OpenRouter-compatible endpoint.

mod catalog;
mod routes;

use aura_core::{OpenRouterReflector, SledBlobStore, SledGateway, UserConfig, WorkspaceConfig, WorkspaceSession};
use routes::AppState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "127.0.0.1:8000";
const DEFAULT_SESSION: &str = "default";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "aura gateway stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = WorkspaceConfig::from_env();
    let session_id = std::env::var("AURA_SESSION_ID").unwrap_or_else(|_| DEFAULT_SESSION.into());
    let bind = std::env::var("AURA_BIND").unwrap_or_else(|_| DEFAULT_BIND.into());

    let user = match UserConfig::load() {
        Ok(user) => Some(user),
        Err(e) => {
            tracing::warn!(error = %e, "user config unreadable; chat disabled");
            None
        }
    };
    if let Some(language) = user.as_ref().and_then(|u| u.language.clone()) {
        config.default_language = language;
    }
    let reflector = user.as_ref().and_then(OpenRouterReflector::from_user_config);
    if user.as_ref().is_some_and(UserConfig::is_first_run) {
        tracing::info!(
            path = %UserConfig::default_path().display(),
            "first run: set api_key in the user config to enable chat"
        );
    }

    let registry = Arc::new(catalog::builtin_registry()?);
    let store = Arc::new(SledGateway::open_path(&config.store_path)?);
    let blobs = Arc::new(SledBlobStore::open(store.db())?);

    let mut builder =
        WorkspaceSession::builder(&session_id, registry, store.clone()).config(config.clone());
    match reflector {
        Some(reflector) => builder = builder.reflector(Arc::new(reflector)),
        None => tracing::warn!("no LLM API key configured; chat will answer with the fallback reply"),
    }
    let session = builder.open().await?;

    let app = routes::router(Arc::new(AppState {
        session: session.clone(),
        blobs,
    }));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(
        addr = %bind,
        session_id = %session_id,
        store = %config.store_path,
        "aura gateway listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown().await?;
    store.flush().await?;
    tracing::info!("aura gateway shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
