//! Entry point: load config, wire dependencies, and run the server.

use focus_sync::config::{Config, StoreBackend};
use focus_sync::db;
use focus_sync::repositories::{FocusStore, FriendGraph, MemoryStore};
use focus_sync::{create_app, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (store, friends): (Arc<dyn FocusStore>, Arc<dyn FriendGraph>) = match config.store_backend
    {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database_url).await?;
            db::run_migrations(&pool).await?;
            let store = Arc::new(db::PgStore::new(pool));
            (store.clone() as Arc<dyn FocusStore>, store as Arc<dyn FriendGraph>)
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; sessions are lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone() as Arc<dyn FocusStore>, store as Arc<dyn FriendGraph>)
        }
    };

    let state = AppState::new(store, friends, &config);
    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, backend = ?config.store_backend, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
