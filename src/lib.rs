use axum::{
    Router,
    extract::{FromRef, Request},
    http::{HeaderName, HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod intake;
pub mod models;
pub mod repository;
pub mod storage;
pub mod validation;

// Routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::{AdminUser, AuthUser};
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use credentials::{TokenService, TokenState};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{FileStoreState, LocalFileStore};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the
/// OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root, handlers::health_check, handlers::register_user, handlers::login,
        handlers::issue_token, handlers::get_me, handlers::create_post, handlers::get_posts,
        handlers::get_post, handlers::delete_post, handlers::get_popular_tags,
        handlers::create_comment, handlers::get_comments, handlers::upload_resource,
        handlers::create_link_resource, handlers::get_resources, handlers::get_resource,
        handlers::delete_resource, handlers::download_resource
    ),
    components(
        schemas(
            models::Role, models::ResourceType, models::Post, models::Comment,
            models::Resource, models::TagCount, models::RegisterRequest, models::LoginRequest,
            models::TokenForm, models::TokenResponse, models::CreatePostRequest,
            models::CreateCommentRequest, models::CreateLinkResourceRequest,
            models::UserProfile, models::HealthResponse, models::MessageResponse,
            validation::FieldError, handlers::UploadResourceForm,
        )
    ),
    tags(
        (name = "neonsec-blog", description = "NeonSec Hacker Blog API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, immutable container of shared services. Built once in `main`
/// (or by a test harness) and cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence gateway (Postgres in production, in-memory in tests).
    pub repo: RepositoryState,
    /// File store backing uploaded resources.
    pub files: FileStoreState,
    /// Bearer token issuance and verification.
    pub tokens: TokenState,
    pub config: AppConfig,
}

impl AppState {
    /// Builds the token service from the configured secret, algorithm and TTL.
    pub fn new(repo: RepositoryState, files: FileStoreState, config: AppConfig) -> Self {
        let tokens = std::sync::Arc::new(TokenService::new(
            &config.jwt_secret,
            config.jwt_algorithm,
            chrono::Duration::minutes(config.token_ttl_minutes),
        ));
        Self {
            repo,
            files,
            tokens,
            config,
        }
    }

    /// The upload pipeline, bound to this state's file store and size ceiling.
    pub fn intake(&self) -> intake::FileIntake {
        intake::FileIntake::new(self.files.clone(), self.config.max_upload_bytes)
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for FileStoreState {
    fn from_ref(app_state: &AppState) -> FileStoreState {
        app_state.files.clone()
    }
}

impl FromRef<AppState> for TokenState {
    fn from_ref(app_state: &AppState) -> TokenState {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request unless `AuthUser` resolves (401 otherwise).
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// Rejects the request unless `AdminUser` resolves (401 or 403 otherwise).
async fn admin_middleware(_admin: AdminUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// cors_layer
///
/// `*` in `CORS_ORIGINS` allows any origin; otherwise only the listed origins
/// that parse as header values.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION])
}

/// create_router
///
/// Assembles the routing tree under `/api`, applies scoped auth middleware and
/// the global observability layers, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let api = Router::new()
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .merge(
            admin::admin_routes(state.config.max_upload_bytes).route_layer(
                middleware::from_fn_with_state(state.clone(), admin_middleware),
            ),
        );

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api)
        // A nested "/" only answers on "/api"; the banner is served with the slash too.
        .route("/api/", get(handlers::root))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer` carrying method, URI and the `x-request-id`, so every
/// log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
