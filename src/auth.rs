use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use uuid::Uuid;

use crate::{
    credentials::TokenState,
    error::ApiError,
    models::{Role, User},
    repository::RepositoryState,
};

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. Handlers take it as an
/// argument and never read identity from the request body.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    /// Public author name stamped on posts and comments.
    pub display_name: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// can_modify
    ///
    /// Owner-or-admin predicate. Callers check existence first, so a missing
    /// record is reported as 404 before this ever yields a 403.
    pub fn can_modify(&self, owner_id: Uuid) -> bool {
        self.id == owner_id || self.is_admin()
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            display_name: user.display_name(),
            id: user.id,
            email: user.email,
            role: user.role,
        }
    }
}

/// bearer_token
///
/// The token part of `Authorization: Bearer <token>`. The scheme is matched
/// case-insensitively.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// AuthUser Extractor Implementation
///
/// 1. Token Extraction: `Authorization: Bearer <jwt>`.
/// 2. Token Verification: signature, algorithm and expiry via `TokenService`.
/// 3. DB Lookup: the subject must name an existing, active user. This rejects
///    tokens that outlive their account.
///
/// Rejection: `ApiError::Unauthorized` (401 with `WWW-Authenticate: Bearer`),
/// or `DependencyUnavailable` when the user lookup itself fails.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    TokenState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let tokens = TokenState::from_ref(state);

        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let claims = tokens.verify_token(token)?;

        let user = repo
            .find_user_by_email(&claims.sub)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        if !user.is_active {
            tracing::warn!("rejected token for inactive user {}", user.id);
            return Err(ApiError::Unauthorized);
        }

        Ok(AuthUser::from(user))
    }
}

/// AdminUser
///
/// An `AuthUser` whose role is `Admin`. Resolving it is the role check, so
/// admin handlers reject non-admins before touching any record.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    TokenState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!("user {} denied admin access to {}", user.id, parts.uri.path());
            return Err(ApiError::Forbidden("Admin privileges required"));
        }
        Ok(AdminUser(user))
    }
}
