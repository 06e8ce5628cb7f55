//! API route modules.
//!
//! Every route is served at the root and again under `/api`.

pub mod health;
pub mod queue;
pub mod status;

use axum::Router;

use crate::api::server::AppState;

fn routes() -> Router<AppState> {
    Router::new()
        .merge(queue::router())
        .merge(status::router())
        .merge(health::router())
}

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .with_state(state)
}
