use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Closed Enumerations (Mapped to Postgres ENUM types) ---

/// Role
///
/// The RBAC field of a user. Stored as the `user_role` Postgres enum, so an
/// unknown role string can never reach the `users` table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

/// ResourceType
///
/// Discriminates file-backed resources (`pdf`, `image`) from external links.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "resource_type", rename_all = "lowercase")]
pub enum ResourceType {
    Pdf,
    Image,
    #[default]
    Link,
}

impl ResourceType {
    /// True for the types whose bytes live on the file store.
    pub fn is_file_backed(self) -> bool {
        match self {
            ResourceType::Pdf | ResourceType::Image => true,
            ResourceType::Link => false,
        }
    }
}

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The canonical identity record from the `users` table. The password hash is
/// never serialized; use `UserProfile` for anything leaving the process.
#[derive(Debug, Clone, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    // Trimmed and lower-cased before it is stored.
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// display_name
    ///
    /// The public author name shown on posts and comments: the local-part of the email.
    pub fn display_name(&self) -> String {
        self.email
            .split_once('@')
            .map(|(local, _)| local)
            .unwrap_or(&self.email)
            .to_string()
    }
}

/// Post
///
/// A blog post from the `posts` table. `author_id` is set from the authenticated
/// caller at creation and never reassigned.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub author: String,
    pub author_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Comment
///
/// A comment record from the `comments` table. Comments only disappear as part of
/// their parent post's deletion.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub content: String,
    pub author: String,
    pub author_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Resource
///
/// A downloadable resource from the `resources` table.
///
/// Exactly one of {`file_path`, `external_url`} is populated, depending on
/// `resource_type`. Build instances through `Resource::from_upload` or
/// `Resource::link` so the invariant holds before anything reaches storage.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub resource_type: ResourceType,

    // File-backed fields (pdf, image).
    pub file_path: Option<String>,
    pub download_url: Option<String>,
    pub file_size: Option<i64>,
    pub file_hash: Option<String>,
    pub mime_type: Option<String>,

    // Link field.
    pub external_url: Option<String>,

    pub is_featured: bool,
    pub uploaded_by: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl Resource {
    /// from_upload
    ///
    /// Builds a file-backed resource from a file accepted by the intake service.
    pub fn from_upload(
        meta: crate::validation::ResourceDraft,
        stored: &crate::intake::StoredFile,
        is_featured: bool,
        uploaded_by: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: meta.name,
            description: meta.description,
            resource_type: stored.kind.resource_type(),
            file_path: Some(stored.relative_path.clone()),
            download_url: Some(stored.download_url.clone()),
            file_size: Some(stored.size),
            file_hash: Some(stored.hash.clone()),
            mime_type: Some(stored.mime_type.to_string()),
            external_url: None,
            is_featured,
            uploaded_by,
            created_at: Utc::now(),
        }
    }

    /// link
    ///
    /// Builds a link resource. No file fields are populated.
    pub fn link(draft: crate::validation::LinkDraft, uploaded_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            description: draft.description,
            resource_type: ResourceType::Link,
            file_path: None,
            download_url: None,
            file_size: None,
            file_hash: None,
            mime_type: None,
            external_url: Some(draft.external_url),
            is_featured: draft.is_featured,
            uploaded_by,
            created_at: Utc::now(),
        }
    }
}

/// TagCount
///
/// One row of the popular-tags aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterRequest
///
/// Input payload for `POST /auth/register`. The password is hashed immediately and
/// never persisted or logged in clear.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// LoginRequest
///
/// JSON credentials for `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// TokenForm
///
/// OAuth2 password-flow form for `POST /auth/token`. `username` carries the email.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

/// TokenResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// CreatePostRequest
///
/// Input payload for `POST /posts`. Author fields are deliberately absent: they are
/// always derived from the bearer token, and any such keys sent by a client are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// CreateCommentRequest
///
/// Input payload for `POST /comments`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCommentRequest {
    pub post_id: String,
    pub content: String,
}

/// CreateLinkResourceRequest
///
/// Input payload for `POST /resources/link`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateLinkResourceRequest {
    pub name: String,
    pub description: String,
    pub external_url: String,
    #[serde(default)]
    pub is_featured: bool,
}

// --- Output Schemas ---

/// UserProfile
///
/// Output schema for a user (`GET /auth/me`, registration response).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

/// HealthResponse
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// MessageResponse
///
/// Plain acknowledgement body, e.g. after a delete.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
