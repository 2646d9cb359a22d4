use std::sync::Arc;

use backend::{router, AppState, RedisRepo, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("backend=info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let repo = RedisRepo::open(&config.redis_url)?;
    let app = router(AppState::new(Arc::new(repo)));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, redis = %config.redis_url, "task backend listening");
    axum::serve(listener, app).await?;
    Ok(())
}
