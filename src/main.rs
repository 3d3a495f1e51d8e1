use axum::{http::Method, Extension};
use club_directory::{
    auth::SessionKeys,
    config::Config,
    directory::Directory,
    store::{postgres::connect_to_db, PgStore},
};
use envconfig::Envconfig;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env()?;
    let keys = SessionKeys::from_base64_secret(
        &config.session_secret,
        config.session_ttl(),
        config.verify_ttl(),
    )
    .map_err(|e| anyhow::anyhow!("SESSION_SECRET must be valid base64: {e}"))?;
    let settings = config.settings()?;

    let pool = connect_to_db(&config.db_url)?;
    let directory = Directory::new(Arc::new(PgStore::new(pool)));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);
    let app = club_directory::app(&config.static_dir)
        .layer(Extension(directory))
        .layer(Extension(Arc::new(keys)))
        .layer(Extension(Arc::new(settings)))
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
