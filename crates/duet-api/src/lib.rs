pub mod auth;
pub mod error;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod socket;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, put},
};

pub use auth::{AppState, AppStateInner, AuthenticatedUser, TokenVerifier};
pub use error::ApiError;

/// `/health`, the `/socket` upgrade and the bearer-protected `/chat/*` read
/// path.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/chat/history/{friend_username}", get(messages::get_history))
        .route("/chat/mark-read/{friend_username}", put(messages::mark_read))
        .route("/chat/unread-count", get(messages::unread_count))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/socket", get(socket::upgrade))
        .merge(protected)
        .with_state(state)
}
