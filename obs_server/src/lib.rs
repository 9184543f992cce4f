//! Reference transport binding (§6): an `axum` HTTP/WebSocket server
//! exposing every transport-visible endpoint the core contracts require.
//! This crate is the *one* place in the workspace that depends on `axum` —
//! `obs_core`/`obs_guide`/`obs_queue`/`obs_focus`/`obs_store` have no
//! transport dependency, so a second binding (gRPC, a CORBA/ICE proxy,
//! whatever) could sit next to this one without touching them.

pub mod error;
pub mod instrument;
pub mod routes;
pub mod settings;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use settings::Settings;
pub use state::AppState;

/// Builds the full router over a shared [`AppState`], used by both the
/// production binary and integration tests.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::devices::router())
        .merge(routes::focus::router())
        .merge(routes::guider::router())
        .merge(routes::tasks::router())
        .merge(routes::ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
