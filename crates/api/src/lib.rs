mod auth;
mod error;
pub mod routes;

use std::net::SocketAddr;

use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use engine::ControlSurface;

pub use error::ApiError;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub control: ControlSurface,
    pub dashboard_token: String,
}

/// Every route, with bearer auth on all but `/healthz`.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(routes::api_router())
        .merge(routes::webhook_router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(protected)
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors)
}

/// Build and run the Axum API server.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    info!(%addr, "HTTP front door listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
