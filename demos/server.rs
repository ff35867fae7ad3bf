//! Demo server: creates the database if needed, applies the sample conference schema, and serves
//! the common routes plus the convention API under `/api`.

use crud_gateway::{
    app, apply_sample_schema, ensure_database_exists, models::sample_registry, AppState, GatewayConfig, PgStoreProvider,
    RouteTable,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crud_gateway=info".parse()?))
        .init();

    let config = GatewayConfig::from_env()?;
    if config.create_database {
        ensure_database_exists(&config.database_url).await?;
    }
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    apply_sample_schema(&pool, config.schema.as_deref()).await?;

    let provider = PgStoreProvider::new(pool, config.schema.clone());
    let state = AppState::new(provider, sample_registry(), RouteTable::conventional()?);
    let router = app(state, config.body_limit);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
