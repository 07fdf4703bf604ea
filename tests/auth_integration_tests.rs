use axum::{
    extract::FromRequestParts,
    http::{Method, Request, Uri, header, request::Parts},
};
use chrono::Duration;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use neonsec_blog::{
    AppConfig, AppState, InMemoryRepository, LocalFileStore,
    auth::{AdminUser, AuthUser},
    credentials::{Claims, CredentialError, TokenService, hash_password, verify_password},
    error::ApiError,
    models::Role,
    repository::Repository,
};
use std::sync::Arc;

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";
const PASSWORD: &str = "correct horse battery";

fn token_service(secret: &str, algorithm: Algorithm) -> TokenService {
    TokenService::new(secret, algorithm, Duration::minutes(30))
}

fn create_app_state(repo: Arc<InMemoryRepository>) -> AppState {
    let config = AppConfig {
        jwt_secret: TEST_JWT_SECRET.to_string(),
        ..AppConfig::default()
    };
    let files = Arc::new(LocalFileStore::new(std::env::temp_dir()));
    AppState::new(repo, files, config)
}

/// Helper to get the Parts struct from a generated Request
fn get_request_parts(method: Method, uri: Uri, token: Option<&str>) -> Parts {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let (parts, _) = builder.body(axum::body::Body::empty()).unwrap().into_parts();
    parts
}

async fn seed_users(repo: &InMemoryRepository) {
    let hash = hash_password(PASSWORD).unwrap();
    // The first account becomes the admin.
    repo.create_user("root@neonsec.io", &hash).await.unwrap();
    repo.create_user("neo@matrix.io", &hash).await.unwrap();
}

// --- Passwords ---

#[test]
fn test_hash_and_verify_password() {
    let hash = hash_password(PASSWORD).unwrap();

    assert!(hash.starts_with("$argon2id$"));
    assert_ne!(hash, PASSWORD);
    assert!(verify_password(PASSWORD, &hash));
    assert!(!verify_password("correct horse battery!", &hash));
}

#[test]
fn test_hashes_are_salted() {
    let first = hash_password(PASSWORD).unwrap();
    let second = hash_password(PASSWORD).unwrap();
    assert_ne!(first, second);
    assert!(verify_password(PASSWORD, &second));
}

#[test]
fn test_malformed_hash_verifies_false() {
    assert!(!verify_password(PASSWORD, "not-a-phc-string"));
    assert!(!verify_password(PASSWORD, ""));
}

// --- Tokens ---

#[test]
fn test_issue_and_verify_token() {
    let tokens = token_service(TEST_JWT_SECRET, Algorithm::HS256);
    let token = tokens.issue_token("neo@matrix.io").unwrap();

    let claims = tokens.verify_token(&token).unwrap();
    assert_eq!(claims.sub, "neo@matrix.io");
    assert_eq!(claims.exp - claims.iat, 30 * 60);
}

#[test]
fn test_token_signed_with_other_secret_is_rejected() {
    let forger = token_service("some-other-secret", Algorithm::HS256);
    let token = forger.issue_token("root@neonsec.io").unwrap();

    let tokens = token_service(TEST_JWT_SECRET, Algorithm::HS256);
    assert!(matches!(
        tokens.verify_token(&token),
        Err(CredentialError::InvalidToken)
    ));
}

#[test]
fn test_tampered_token_is_rejected() {
    let tokens = token_service(TEST_JWT_SECRET, Algorithm::HS256);
    let token = tokens.issue_token("neo@matrix.io").unwrap();

    // Swap the payload for one naming another subject, keep the signature.
    let forged_claims = Claims {
        sub: "root@neonsec.io".to_string(),
        exp: usize::MAX / 2,
        iat: 0,
    };
    let other = encode(
        &Header::default(),
        &forged_claims,
        &EncodingKey::from_secret(b"unknown"),
    )
    .unwrap();
    let mut pieces: Vec<&str> = token.split('.').collect();
    pieces[1] = other.split('.').nth(1).unwrap();
    let tampered = pieces.join(".");

    assert!(matches!(
        tokens.verify_token(&tampered),
        Err(CredentialError::InvalidToken)
    ));
    assert!(matches!(
        tokens.verify_token("garbage"),
        Err(CredentialError::InvalidToken)
    ));
}

#[test]
fn test_expired_token_is_rejected() {
    let tokens = token_service(TEST_JWT_SECRET, Algorithm::HS256);
    let token = tokens
        .issue_token_with_ttl("neo@matrix.io", Duration::minutes(-5))
        .unwrap();

    assert!(matches!(
        tokens.verify_token(&token),
        Err(CredentialError::InvalidToken)
    ));
}

#[test]
fn test_token_with_unexpected_algorithm_is_rejected() {
    let hs512 = token_service(TEST_JWT_SECRET, Algorithm::HS512);
    let token = hs512.issue_token("neo@matrix.io").unwrap();

    let hs256 = token_service(TEST_JWT_SECRET, Algorithm::HS256);
    assert!(matches!(
        hs256.verify_token(&token),
        Err(CredentialError::InvalidToken)
    ));
}

// --- Extractors ---

#[tokio::test]
async fn test_auth_success_with_valid_jwt() {
    let repo = Arc::new(InMemoryRepository::new());
    seed_users(&repo).await;
    let app_state = create_app_state(repo);
    let token = app_state.tokens.issue_token("neo@matrix.io").unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap(), Some(&token));
    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();

    assert_eq!(user.email, "neo@matrix.io");
    assert_eq!(user.display_name, "neo");
    assert_eq!(user.role, Role::User);
}

#[tokio::test]
async fn test_auth_failure_with_missing_header() {
    let app_state = create_app_state(Arc::new(InMemoryRepository::new()));

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap(), None);
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert!(matches!(auth_user, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_auth_failure_with_expired_jwt() {
    let repo = Arc::new(InMemoryRepository::new());
    seed_users(&repo).await;
    let app_state = create_app_state(repo);
    let token = app_state
        .tokens
        .issue_token_with_ttl("neo@matrix.io", Duration::seconds(-1))
        .unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap(), Some(&token));
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert!(matches!(auth_user, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_auth_failure_for_unknown_subject() {
    let app_state = create_app_state(Arc::new(InMemoryRepository::new()));
    let token = app_state.tokens.issue_token("ghost@nowhere.io").unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap(), Some(&token));
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert!(matches!(auth_user, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_auth_failure_when_store_is_down() {
    let repo = Arc::new(InMemoryRepository::new());
    seed_users(&repo).await;
    let app_state = create_app_state(repo.clone());
    let token = app_state.tokens.issue_token("neo@matrix.io").unwrap();
    repo.set_offline(true);

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap(), Some(&token));
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert!(matches!(auth_user, Err(ApiError::DependencyUnavailable)));
}

#[tokio::test]
async fn test_admin_extractor_requires_admin_role() {
    let repo = Arc::new(InMemoryRepository::new());
    seed_users(&repo).await;
    let app_state = create_app_state(repo.clone());

    let user_token = app_state.tokens.issue_token("neo@matrix.io").unwrap();
    let mut parts = get_request_parts(
        Method::DELETE,
        "/api/resources/1".parse().unwrap(),
        Some(&user_token),
    );
    let denied = AdminUser::from_request_parts(&mut parts, &app_state).await;
    assert!(matches!(denied, Err(ApiError::Forbidden(_))));

    let admin_token = app_state.tokens.issue_token("root@neonsec.io").unwrap();
    let mut parts = get_request_parts(
        Method::DELETE,
        "/api/resources/1".parse().unwrap(),
        Some(&admin_token),
    );
    let AdminUser(admin) = AdminUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert!(admin.is_admin());

    let stored = repo.find_user_by_email("root@neonsec.io").await.unwrap().unwrap();
    assert_eq!(admin.id, stored.id);
}

#[tokio::test]
async fn test_authorization_header_must_use_bearer_scheme() {
    let repo = Arc::new(InMemoryRepository::new());
    seed_users(&repo).await;
    let app_state = create_app_state(repo);
    let token = app_state.tokens.issue_token("neo@matrix.io").unwrap();

    let resolve = |value: String| {
        let app_state = app_state.clone();
        async move {
            let (mut parts, _) = Request::builder()
                .uri("/")
                .header(header::AUTHORIZATION, value)
                .body(axum::body::Body::empty())
                .unwrap()
                .into_parts();
            AuthUser::from_request_parts(&mut parts, &app_state).await
        }
    };

    // The scheme is case-insensitive.
    assert!(resolve(format!("bearer {token}")).await.is_ok());
    assert!(resolve(format!("BEARER {token}")).await.is_ok());

    for value in [
        format!("Basic {token}"),
        token.clone(),
        "Bearer ".to_string(),
        "Bearer".to_string(),
    ] {
        assert!(matches!(resolve(value).await, Err(ApiError::Unauthorized)));
    }
}

#[test]
fn test_can_modify_owner_or_admin() {
    let owner = uuid::Uuid::new_v4();
    let user = AuthUser {
        id: owner,
        email: "neo@matrix.io".into(),
        role: Role::User,
        display_name: "neo".into(),
    };
    assert!(user.can_modify(owner));
    assert!(!user.can_modify(uuid::Uuid::new_v4()));
    assert!(!user.is_admin());

    let admin = AuthUser {
        role: Role::Admin,
        id: uuid::Uuid::new_v4(),
        ..user
    };
    assert!(admin.can_modify(owner));
}
