//! axum HTTP API for the compute broker: record, molecule,
//! and manager routes behind a single bearer-token auth layer. Every route
//! requires a principal, so there's no public half besides `/health`.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

pub use state::AppState;

async fn health() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::records::router())
        .merge(routes::molecules::router())
        .merge(routes::managers::router())
        .merge(routes::admin::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::authenticate));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
