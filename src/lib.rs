use std::{io, path::Path};

use axum::{http::StatusCode, routing::get_service, Router};
use tower_http::services::ServeDir;

pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod fixture;
pub mod models;
pub mod schema;
pub mod store;

/// All routes plus static assets. Callers add the `Directory`,
/// `Arc<SessionKeys>` and `Arc<Settings>` extensions.
pub fn app(static_dir: impl AsRef<Path>) -> Router {
    let serve = get_service(ServeDir::new(static_dir)).handle_error(handle_error);
    api::app().nest("/static", serve)
}

async fn handle_error(_: io::Error) -> error::AppError {
    error::AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch asset")
}
