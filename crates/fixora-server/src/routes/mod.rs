// Export route modules
pub mod auth;
pub mod config;
pub mod connections;
pub mod reply;

use crate::state::AppState;
use axum::{routing::get, Router};

async fn status() -> &'static str {
    "ok"
}

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .merge(reply::routes(state.clone()))
        .merge(config::routes(state.clone()))
        .merge(connections::routes(state.clone()))
        .merge(auth::routes(state))
}
