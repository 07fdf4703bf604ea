use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Authenticated Router Module
///
/// Endpoints for any signed-in user. Author fields of everything created here
/// come from the `AuthUser` identity, never from the request body.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /auth/me
        .route("/auth/me", get(handlers::get_me))
        // POST /posts
        .route("/posts", post(handlers::create_post))
        // DELETE /posts/{id}
        // Owner or admin. Cascades to the post's comments.
        .route("/posts/{id}", delete(handlers::delete_post))
        // POST /comments
        // The referenced post must exist.
        .route("/comments", post(handlers::create_comment))
}
