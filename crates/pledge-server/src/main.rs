use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use pledge_api::state::AppStateInner;
use pledge_chat::{FeedHub, SqliteChatStore};
use pledge_gateway::auth::TokenVerifier;
use pledge_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pledge=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = pledge_db::Database::open(&config.db_path)?;

    // Shared state
    let store = Arc::new(SqliteChatStore::new(Arc::new(db), FeedHub::new()));
    let state = Arc::new(AppStateInner {
        backend: store.backend(),
        config: config.chat.clone(),
        verifier: TokenVerifier::new(&config.jwt_secret, &config.jwt_audience),
    });

    let app = pledge_server::app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Pledge chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
