use crate::{
    AppState,
    auth::{AdminUser, AuthUser},
    credentials::{hash_password, verify_password},
    error::{ApiError, ApiResult},
    intake::{self, IntakeError},
    models::{
        Comment, CreateCommentRequest, CreateLinkResourceRequest, CreatePostRequest,
        HealthResponse, LoginRequest, MessageResponse, Post, RegisterRequest, Resource,
        ResourceType, TagCount, TokenForm, TokenResponse, UserProfile,
    },
    repository::{COMMENT_LIST_LIMIT, POPULAR_TAGS_LIMIT, PostQuery, ResourceQuery},
    storage::StorageError,
    validation::{self, ValidationErrors},
};
use axum::{
    Form, Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;
use uuid::Uuid;

pub const API_BANNER: &str = "NeonSec Hacker Blog API v1.0";

// --- Filter Structs ---

/// PostFilter
///
/// Query parameters for `GET /posts`.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct PostFilter {
    /// Exact tag match (case-insensitive).
    pub tag: Option<String>,
    /// Substring over title, content and tags (case-insensitive).
    pub search: Option<String>,
}

impl From<PostFilter> for PostQuery {
    fn from(filter: PostFilter) -> Self {
        PostQuery {
            tag: non_empty(filter.tag).map(|tag| tag.to_lowercase()),
            search: non_empty(filter.search),
            ..PostQuery::default()
        }
    }
}

/// ResourceFilter
///
/// Query parameters for `GET /resources`.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct ResourceFilter {
    pub resource_type: Option<ResourceType>,
    /// Substring over name and description (case-insensitive).
    pub search: Option<String>,
    #[serde(default)]
    pub featured_only: bool,
}

impl From<ResourceFilter> for ResourceQuery {
    fn from(filter: ResourceFilter) -> Self {
        ResourceQuery {
            resource_type: filter.resource_type,
            search: non_empty(filter.search),
            featured_only: filter.featured_only,
            ..ResourceQuery::default()
        }
    }
}

/// UploadResourceForm
///
/// OpenAPI description of the multipart body accepted by `POST /resources/upload`.
/// The handler reads the parts as a stream; this type only feeds the docs.
#[derive(ToSchema)]
pub struct UploadResourceForm {
    pub name: String,
    pub description: String,
    pub is_featured: Option<bool>,
    #[schema(content_media_type = "application/octet-stream")]
    pub file: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Unparsable ids can never name a stored record.
fn parse_id(raw: &str, entity: &'static str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::NotFound(entity))
}

// --- Service ---

/// root
///
/// [Public Route] API banner.
#[utoipa::path(
    get,
    path = "/api/",
    responses((status = 200, description = "API banner", body = MessageResponse))
)]
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse::new(API_BANNER))
}

/// health_check
///
/// [Public Route] Readiness probe. Pings the persistence layer and reports 503
/// when it cannot be reached.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.repo.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                database: "connected".to_string(),
            }),
        ),
        Err(e) => {
            tracing::error!("health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    database: "unreachable".to_string(),
                }),
            )
        }
    }
}

// --- Identity ---

/// register_user
///
/// [Public Route] Creates an account. The first account ever created becomes
/// the administrator; the decision is made atomically by the repository.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = UserProfile),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    let credentials = validation::validate_registration(&payload.email, &payload.password)?;

    let password = credentials.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

    let user = state
        .repo
        .create_user(&credentials.email, &password_hash)
        .await?;

    tracing::info!("registered user {} with role {:?}", user.id, user.role);
    Ok((StatusCode::CREATED, Json(UserProfile::from(user))))
}

/// authenticate
///
/// Shared by both login endpoints. Unknown email, wrong password and inactive
/// account all produce the same `InvalidCredentials` answer.
async fn authenticate(state: &AppState, email: &str, password: &str) -> ApiResult<TokenResponse> {
    let email = validation::normalize_email(email);
    let Some(user) = state.repo.find_user_by_email(&email).await? else {
        tracing::warn!("login failed: unknown account");
        return Err(ApiError::InvalidCredentials);
    };

    let password = password.to_string();
    let hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?;

    if !verified || !user.is_active {
        tracing::warn!("login failed for user {}", user.id);
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.tokens.issue_token(&user.email)?;
    tracing::info!("issued token for user {}", user.id);
    Ok(TokenResponse::bearer(token))
}

/// login
///
/// [Public Route] JSON credential exchange.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Bearer token", body = TokenResponse),
        (status = 401, description = "Incorrect email or password")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    authenticate(&state, &payload.email, &payload.password)
        .await
        .map(Json)
}

/// issue_token
///
/// [Public Route] OAuth2 password flow: form fields `username` (the email) and `password`.
#[utoipa::path(
    post,
    path = "/api/auth/token",
    request_body(content = TokenForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Bearer token", body = TokenResponse),
        (status = 401, description = "Incorrect email or password")
    )
)]
pub async fn issue_token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> ApiResult<Json<TokenResponse>> {
    authenticate(&state, &form.username, &form.password)
        .await
        .map(Json)
}

/// get_me
///
/// [Authenticated Route] The caller's profile.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn get_me(auth: AuthUser, State(state): State<AppState>) -> ApiResult<Json<UserProfile>> {
    let user = state
        .repo
        .get_user(auth.id)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(UserProfile::from(user)))
}

// --- Posts ---

/// create_post
///
/// [Authenticated Route] Publishes a post. `author` and `author_id` always come
/// from the token; any such fields in the body are ignored.
#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 400, description = "Validation failed")
    )
)]
pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<Post>)> {
    let draft = validation::validate_post(&payload)?;

    let post = Post {
        id: Uuid::new_v4(),
        title: draft.title,
        content: draft.content,
        tags: draft.tags,
        author: auth.display_name,
        author_id: auth.id,
        created_at: Utc::now(),
    };

    let post = state.repo.create_post(post).await?;
    tracing::info!("user {} created post {}", auth.id, post.id);
    Ok((StatusCode::CREATED, Json(post)))
}

/// get_posts
///
/// [Public Route] Newest first, optionally filtered by tag and/or search term.
#[utoipa::path(
    get,
    path = "/api/posts",
    params(PostFilter),
    responses((status = 200, description = "Posts", body = [Post]))
)]
pub async fn get_posts(
    State(state): State<AppState>,
    Query(filter): Query<PostFilter>,
) -> ApiResult<Json<Vec<Post>>> {
    let posts = state.repo.list_posts(&PostQuery::from(filter)).await?;
    Ok(Json(posts))
}

/// get_post
///
/// [Public Route] A single post by id.
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Post>> {
    let id = parse_id(&id, "Post")?;
    let post = state
        .repo
        .get_post(id)
        .await?
        .ok_or(ApiError::NotFound("Post"))?;
    Ok(Json(post))
}

/// delete_post
///
/// [Authenticated Route] Owner or admin only. Existence is checked before
/// ownership, and the post's comments are removed together with it.
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let id = parse_id(&id, "Post")?;
    let post = state
        .repo
        .get_post(id)
        .await?
        .ok_or(ApiError::NotFound("Post"))?;

    if !auth.can_modify(post.author_id) {
        tracing::warn!("user {} denied deletion of post {}", auth.id, id);
        return Err(ApiError::Forbidden("Not authorized to delete this post"));
    }

    // A concurrent delete may have won the race.
    if !state.repo.delete_post_cascade(id).await? {
        return Err(ApiError::NotFound("Post"));
    }

    tracing::info!("user {} deleted post {}", auth.id, id);
    Ok(Json(MessageResponse::new("Post deleted successfully")))
}

/// get_popular_tags
///
/// [Public Route] The most used tags with their post counts.
#[utoipa::path(
    get,
    path = "/api/tags",
    responses((status = 200, description = "Popular tags", body = [TagCount]))
)]
pub async fn get_popular_tags(State(state): State<AppState>) -> ApiResult<Json<Vec<TagCount>>> {
    let tags = state.repo.popular_tags(POPULAR_TAGS_LIMIT).await?;
    Ok(Json(tags))
}

// --- Comments ---

/// create_comment
///
/// [Authenticated Route] The parent post must exist.
#[utoipa::path(
    post,
    path = "/api/comments",
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn create_comment(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let draft = validation::validate_comment(&payload)?;

    let post_id = parse_id(&payload.post_id, "Post")?;
    if state.repo.get_post(post_id).await?.is_none() {
        return Err(ApiError::NotFound("Post"));
    }

    let comment = Comment {
        id: Uuid::new_v4(),
        post_id,
        content: draft.content,
        author: auth.display_name,
        author_id: auth.id,
        created_at: Utc::now(),
    };

    let comment = state.repo.create_comment(comment).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// get_comments
///
/// [Public Route] Comments of one post, oldest first. An unknown or deleted
/// post simply has no comments.
#[utoipa::path(
    get,
    path = "/api/comments/{post_id}",
    params(("post_id" = String, Path, description = "Post id")),
    responses((status = 200, description = "Comments (empty for an unknown post)", body = [Comment]))
)]
pub async fn get_comments(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> ApiResult<Json<Vec<Comment>>> {
    let Ok(post_id) = Uuid::parse_str(post_id.trim()) else {
        return Ok(Json(Vec::new()));
    };
    let comments = state.repo.get_comments(post_id, COMMENT_LIST_LIMIT).await?;
    Ok(Json(comments))
}

// --- Resources ---

/// UploadForm
///
/// The multipart parts collected from an upload request.
#[derive(Debug, Default)]
struct UploadForm {
    name: String,
    description: String,
    is_featured: bool,
    file: Option<(String, Vec<u8>)>,
}

fn multipart_error(e: MultipartError, limit: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IntakeError::TooLarge { limit }.into()
    } else {
        ValidationErrors::single("file", e.body_text()).into()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// read_upload_form
///
/// Collects the known parts. The file part is read chunk by chunk and the read
/// stops as soon as the ceiling is crossed, so an oversized upload is never
/// buffered in full.
async fn read_upload_form(multipart: &mut Multipart, max_bytes: usize) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let mut bytes = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| multipart_error(e, max_bytes))?
                {
                    if bytes.len() + chunk.len() > max_bytes {
                        return Err(IntakeError::TooLarge { limit: max_bytes }.into());
                    }
                    bytes.extend_from_slice(&chunk);
                }
                form.file = Some((filename, bytes));
            }
            Some("name") => {
                form.name = field.text().await.map_err(|e| multipart_error(e, max_bytes))?;
            }
            Some("description") => {
                form.description = field.text().await.map_err(|e| multipart_error(e, max_bytes))?;
            }
            Some("is_featured") => {
                let raw = field.text().await.map_err(|e| multipart_error(e, max_bytes))?;
                form.is_featured = parse_flag(&raw).ok_or_else(|| {
                    ValidationErrors::single("is_featured", "must be true or false")
                })?;
            }
            _ => {}
        }
    }

    Ok(form)
}

/// upload_resource
///
/// [Admin Route] Multipart upload of an image or PDF.
///
/// 1. Form Collection: parts are read with the file capped at `MAX_UPLOAD_BYTES`.
/// 2. Metadata Validation: name and description, before any byte reaches the store.
/// 3. File Intake: extension, content sniffing, sanitized storage name, SHA-256.
/// 4. Record Write: on failure the stored file is removed again.
#[utoipa::path(
    post,
    path = "/api/resources/upload",
    request_body(content = UploadResourceForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Resource created", body = Resource),
        (status = 400, description = "Validation or file check failed"),
        (status = 403, description = "Admin privileges required")
    )
)]
pub async fn upload_resource(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<Resource>)> {
    let mut multipart =
        multipart.map_err(|e| ValidationErrors::single("file", e.body_text()))?;

    let intake = state.intake();
    let form = read_upload_form(&mut multipart, intake.max_bytes()).await?;

    let meta = validation::validate_resource_meta(&form.name, &form.description)?;
    let (filename, bytes) = form.file.ok_or(IntakeError::MissingFile)?;

    let stored = intake.accept(&filename, &bytes).await?;
    let resource = Resource::from_upload(meta, &stored, form.is_featured, admin.id);

    match state.repo.create_resource(resource).await {
        Ok(resource) => {
            tracing::info!("admin {} uploaded resource {}", admin.id, resource.id);
            Ok((StatusCode::CREATED, Json(resource)))
        }
        Err(e) => {
            intake.discard(&stored).await;
            Err(e.into())
        }
    }
}

/// create_link_resource
///
/// [Admin Route] A resource pointing at an external URL. No file is stored.
#[utoipa::path(
    post,
    path = "/api/resources/link",
    request_body = CreateLinkResourceRequest,
    responses(
        (status = 201, description = "Resource created", body = Resource),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Admin privileges required")
    )
)]
pub async fn create_link_resource(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateLinkResourceRequest>,
) -> ApiResult<(StatusCode, Json<Resource>)> {
    let draft = validation::validate_link(&payload)?;
    let resource = state
        .repo
        .create_resource(Resource::link(draft, admin.id))
        .await?;
    tracing::info!("admin {} linked resource {}", admin.id, resource.id);
    Ok((StatusCode::CREATED, Json(resource)))
}

/// get_resources
///
/// [Public Route] Featured resources first, then newest.
#[utoipa::path(
    get,
    path = "/api/resources",
    params(ResourceFilter),
    responses((status = 200, description = "Resources", body = [Resource]))
)]
pub async fn get_resources(
    State(state): State<AppState>,
    Query(filter): Query<ResourceFilter>,
) -> ApiResult<Json<Vec<Resource>>> {
    let resources = state
        .repo
        .list_resources(&ResourceQuery::from(filter))
        .await?;
    Ok(Json(resources))
}

/// get_resource
///
/// [Public Route] A single resource by id. File-backed resources carry their
/// `download_url`; links carry `external_url`.
#[utoipa::path(
    get,
    path = "/api/resources/{id}",
    params(("id" = String, Path, description = "Resource id")),
    responses(
        (status = 200, description = "Resource", body = Resource),
        (status = 404, description = "Resource not found")
    )
)]
pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Resource>> {
    let id = parse_id(&id, "Resource")?;
    let resource = state
        .repo
        .get_resource(id)
        .await?
        .ok_or(ApiError::NotFound("Resource"))?;
    Ok(Json(resource))
}

/// delete_resource
///
/// [Admin Route] Removes the backing file (if any) and then the record.
#[utoipa::path(
    delete,
    path = "/api/resources/{id}",
    params(("id" = String, Path, description = "Resource id")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Admin privileges required"),
        (status = 404, description = "Resource not found")
    )
)]
pub async fn delete_resource(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let id = parse_id(&id, "Resource")?;
    let resource = state
        .repo
        .get_resource(id)
        .await?
        .ok_or(ApiError::NotFound("Resource"))?;

    if let Some(path) = &resource.file_path {
        state.files.remove(path).await?;
    }

    if !state.repo.delete_resource(id).await? {
        return Err(ApiError::NotFound("Resource"));
    }

    tracing::info!("admin {} deleted resource {}", admin.id, id);
    Ok(Json(MessageResponse::new("Resource deleted successfully")))
}

/// download_resource
///
/// [Public Route] Streams a stored file as an attachment. Only bare names made
/// of sanitized characters are looked up, in `images/` then `documents/`.
#[utoipa::path(
    get,
    path = "/api/resources/download/{filename}",
    params(("filename" = String, Path, description = "Stored file name")),
    responses(
        (status = 200, description = "File contents"),
        (status = 404, description = "File not found")
    )
)]
pub async fn download_resource(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    if !intake::is_servable_name(&filename) {
        tracing::warn!("rejected download name {:?}", filename);
        return Err(ApiError::NotFound("File"));
    }

    let path = state
        .files
        .find(&filename)
        .await?
        .ok_or(ApiError::NotFound("File"))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(StorageError::from)?;
    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

