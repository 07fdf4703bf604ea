use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that need no token. Everything here is read-only apart from the
/// identity gateway (register and the two login flavours).
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /
        // API banner.
        .route("/", get(handlers::root))
        // GET /health
        // Readiness probe for load balancers; 503 when the database is unreachable.
        .route("/health", get(handlers::health_check))
        // --- Identity ---
        .route("/auth/register", post(handlers::register_user))
        // JSON body.
        .route("/auth/login", post(handlers::login))
        // OAuth2 password flow (form-encoded `username`/`password`).
        .route("/auth/token", post(handlers::issue_token))
        // --- Posts & Comments ---
        // GET /posts?tag=...&search=...
        .route("/posts", get(handlers::get_posts))
        .route("/posts/{id}", get(handlers::get_post))
        .route("/comments/{post_id}", get(handlers::get_comments))
        .route("/tags", get(handlers::get_popular_tags))
        // --- Resources ---
        // GET /resources?resource_type=...&search=...&featured_only=...
        .route("/resources", get(handlers::get_resources))
        .route("/resources/{id}", get(handlers::get_resource))
        // Streams a stored file as an attachment.
        .route(
            "/resources/download/{filename}",
            get(handlers::download_resource),
        )
}
