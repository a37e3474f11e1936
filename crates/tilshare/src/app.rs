use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use tilshare_auth::{auth_routes, AuthConfig};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Create the application router with all routes and middleware.
pub fn create_app(config: AuthConfig) -> Router {
    Router::new()
        .route("/livez", get(livez))
        .merge(auth_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        .with_state(config)
}

/// GET /livez - Basic liveness probe.
async fn livez() -> StatusCode {
    StatusCode::OK
}
