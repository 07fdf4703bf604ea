use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, post},
};

/// Multipart framing (boundaries, the text parts) on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Admin Router Module
///
/// Resource management, restricted to the `admin` role. The role check runs in
/// the middleware layer and again in each handler's `AdminUser` extractor,
/// always before any record is looked up.
pub fn admin_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // POST /resources/upload
        // Multipart: name, description, is_featured, file. The body limit is lifted
        // above axum's 2 MB default; the intake service enforces the exact ceiling.
        .route(
            "/resources/upload",
            post(handlers::upload_resource).layer(DefaultBodyLimit::max(
                max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
            )),
        )
        // POST /resources/link
        .route("/resources/link", post(handlers::create_link_resource))
        // DELETE /resources/{id}
        // Removes the backing file, then the record.
        .route("/resources/{id}", delete(handlers::delete_resource))
}
