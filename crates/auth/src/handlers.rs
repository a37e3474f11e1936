//! HTTP handlers for auth routes.

use axum::{
    extract::{Query, State},
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use serde::Deserialize;
use tilshare_core::auth::validate_return_to;

use crate::config::AuthConfig;
use crate::templates;

/// Query parameters for the callback page.
#[derive(Deserialize, Default)]
pub struct CallbackQuery {
    /// Local path to navigate to when there is no opener window.
    pub return_to: Option<String>,
}

/// Creates the auth router.
///
/// Routes:
/// - `GET /auth/callback` - Static page the identity provider returns to
pub fn auth_routes() -> Router<AuthConfig> {
    Router::new().route("/auth/callback", get(callback))
}

async fn callback(
    State(config): State<AuthConfig>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    // Validate return_to URL to prevent open redirect attacks
    let return_to = query
        .return_to
        .as_deref()
        .and_then(validate_return_to)
        .unwrap_or(config.app_root.as_str());

    tracing::debug!(return_to, "Serving auth callback page");

    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(templates::callback_page(return_to)),
    )
}
