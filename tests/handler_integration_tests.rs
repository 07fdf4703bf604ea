use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode, header},
    response::IntoResponse,
};
use neonsec_blog::{
    AppConfig, AppState,
    auth::{AdminUser, AuthUser},
    create_router,
    credentials::hash_password,
    error::ApiError,
    handlers,
    intake::IntakeError,
    models::{
        Comment, CreateCommentRequest, CreatePostRequest, LoginRequest, Post, Resource, Role,
        TagCount, User,
    },
    repository::{InMemoryRepository, PostQuery, Repository, RepositoryError, ResourceQuery},
    storage::{FileStore, FileStoreState, LocalFileStore, StorageError},
    validation::ValidationErrors,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::test;
use tower::ServiceExt;
use uuid::Uuid;

const PASSWORD: &str = "correct horse battery";
const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];

// --- MOCK REPOSITORY IMPLEMENTATION ---

// Delegates to the in-memory gateway, with switches for the failure modes the
// real stores can produce.
#[derive(Default)]
pub struct MockRepoControl {
    pub inner: InMemoryRepository,
    // Every resource insert fails as if the database went away.
    pub fail_resource_writes: bool,
    // Accounts reported as deactivated by every user lookup.
    pub deactivated: Vec<String>,
}

impl MockRepoControl {
    fn deactivate(&self, user: Option<User>) -> Option<User> {
        user.map(|mut u| {
            if self.deactivated.contains(&u.email) {
                u.is_active = false;
            }
            u
        })
    }
}

#[async_trait]
impl Repository for MockRepoControl {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.inner.ping().await
    }

    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, RepositoryError> {
        self.inner.create_user(email, password_hash).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.deactivate(self.inner.get_user(id).await?))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.deactivate(self.inner.find_user_by_email(email).await?))
    }

    async fn create_post(&self, post: Post) -> Result<Post, RepositoryError> {
        self.inner.create_post(post).await
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, RepositoryError> {
        self.inner.get_post(id).await
    }

    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, RepositoryError> {
        self.inner.list_posts(query).await
    }

    async fn delete_post_cascade(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_post_cascade(id).await
    }

    async fn popular_tags(&self, limit: i64) -> Result<Vec<TagCount>, RepositoryError> {
        self.inner.popular_tags(limit).await
    }

    async fn create_comment(&self, comment: Comment) -> Result<Comment, RepositoryError> {
        self.inner.create_comment(comment).await
    }

    async fn get_comments(
        &self,
        post_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Comment>, RepositoryError> {
        self.inner.get_comments(post_id, limit).await
    }

    async fn create_resource(&self, resource: Resource) -> Result<Resource, RepositoryError> {
        if self.fail_resource_writes {
            return Err(RepositoryError::Unavailable("connection reset".to_string()));
        }
        self.inner.create_resource(resource).await
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>, RepositoryError> {
        self.inner.get_resource(id).await
    }

    async fn list_resources(
        &self,
        query: &ResourceQuery,
    ) -> Result<Vec<Resource>, RepositoryError> {
        self.inner.list_resources(query).await
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_resource(id).await
    }
}

// --- TEST STATE SCAFFOLDING ---

struct TestContext {
    state: AppState,
    uploads: TempDir,
}

async fn create_test_state(control: MockRepoControl) -> TestContext {
    let uploads = tempfile::tempdir().expect("Failed to create upload dir");
    let store = LocalFileStore::new(uploads.path());
    store.ensure_layout().await.expect("Failed to create layout");

    let config = AppConfig {
        upload_dir: uploads.path().to_path_buf(),
        ..AppConfig::default()
    };
    let state = AppState::new(
        Arc::new(control),
        Arc::new(store) as FileStoreState,
        config,
    );
    TestContext { state, uploads }
}

async fn seed_user(state: &AppState, email: &str) -> AuthUser {
    let hash = hash_password(PASSWORD).unwrap();
    let user = state.repo.create_user(email, &hash).await.unwrap();
    AuthUser::from(user)
}

async fn seed_post(state: &AppState, author: &AuthUser) -> Post {
    let request = CreatePostRequest {
        title: "Living off the land".to_string(),
        content: "Built-in binaries are your toolkit.".to_string(),
        tags: vec!["lolbins".to_string()],
    };
    let (status, Json(post)) = handlers::create_post(author.clone(), State(state.clone()), Json(request))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    post
}

fn multipart_upload(token: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "neonsec-test-boundary";
    let mut body = Vec::new();
    for (name, value) in [
        ("name", "Recon cheat sheet"),
        ("description", "One page of passive recon commands."),
    ] {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/resources/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body))
        .unwrap()
}

fn stored_files(uploads: &TempDir, dir: &str) -> usize {
    std::fs::read_dir(uploads.path().join(dir)).unwrap().count()
}

// --- Posts ---

#[test]
async fn test_delete_missing_post_is_not_found_before_ownership() {
    let ctx = create_test_state(MockRepoControl::default()).await;
    seed_user(&ctx.state, "root@neonsec.io").await;
    let user = seed_user(&ctx.state, "neo@matrix.io").await;

    let result = handlers::delete_post(
        user,
        State(ctx.state.clone()),
        Path(Uuid::new_v4().to_string()),
    )
    .await;
    assert!(matches!(result, Err(ApiError::NotFound("Post"))));
}

#[test]
async fn test_delete_post_owner_or_admin() {
    let ctx = create_test_state(MockRepoControl::default()).await;
    let admin = seed_user(&ctx.state, "root@neonsec.io").await;
    let owner = seed_user(&ctx.state, "neo@matrix.io").await;
    let stranger = seed_user(&ctx.state, "smith@matrix.io").await;
    assert_eq!(admin.role, Role::Admin);

    let first = seed_post(&ctx.state, &owner).await;
    let second = seed_post(&ctx.state, &owner).await;

    let denied = handlers::delete_post(
        stranger,
        State(ctx.state.clone()),
        Path(first.id.to_string()),
    )
    .await;
    assert!(matches!(denied, Err(ApiError::Forbidden(_))));

    let by_owner =
        handlers::delete_post(owner, State(ctx.state.clone()), Path(first.id.to_string())).await;
    assert!(by_owner.is_ok());

    let by_admin =
        handlers::delete_post(admin, State(ctx.state.clone()), Path(second.id.to_string())).await;
    assert!(by_admin.is_ok());
}

// --- Comments ---

#[test]
async fn test_comment_validation_runs_before_lookup() {
    let ctx = create_test_state(MockRepoControl::default()).await;
    let user = seed_user(&ctx.state, "neo@matrix.io").await;

    let result = handlers::create_comment(
        user.clone(),
        State(ctx.state.clone()),
        Json(CreateCommentRequest {
            post_id: "garbage".to_string(),
            content: "   ".to_string(),
        }),
    )
    .await;
    assert!(matches!(result, Err(ApiError::Validation(_))));

    let result = handlers::create_comment(
        user,
        State(ctx.state.clone()),
        Json(CreateCommentRequest {
            post_id: "garbage".to_string(),
            content: "first!".to_string(),
        }),
    )
    .await;
    assert!(matches!(result, Err(ApiError::NotFound("Post"))));
}

#[test]
async fn test_comment_author_derived_from_identity() {
    let ctx = create_test_state(MockRepoControl::default()).await;
    let author = seed_user(&ctx.state, "neo@matrix.io").await;
    let commenter = seed_user(&ctx.state, "trinity@zion.net").await;
    let post = seed_post(&ctx.state, &author).await;

    let (status, Json(comment)) = handlers::create_comment(
        commenter.clone(),
        State(ctx.state.clone()),
        Json(CreateCommentRequest {
            post_id: post.id.to_string(),
            content: "  Great thread  ".to_string(),
        }),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment.author_id, commenter.id);
    assert_eq!(comment.author, "trinity");
    assert_eq!(comment.content, "Great thread");
}

// --- Identity ---

#[test]
async fn test_inactive_account_cannot_log_in_or_use_token() {
    let ctx = create_test_state(MockRepoControl {
        deactivated: vec!["neo@matrix.io".to_string()],
        ..MockRepoControl::default()
    })
    .await;
    seed_user(&ctx.state, "neo@matrix.io").await;

    let login = handlers::login(
        State(ctx.state.clone()),
        Json(LoginRequest {
            email: "neo@matrix.io".to_string(),
            password: PASSWORD.to_string(),
        }),
    )
    .await;
    assert!(matches!(login, Err(ApiError::InvalidCredentials)));

    // A token minted before deactivation is refused too.
    let token = ctx.state.tokens.issue_token("neo@matrix.io").unwrap();
    let response = create_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
async fn test_token_for_deleted_account_is_rejected() {
    let ctx = create_test_state(MockRepoControl::default()).await;
    let token = ctx.state.tokens.issue_token("ghost@nowhere.io").unwrap();

    let response = create_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// --- Resources ---

#[test]
async fn test_failed_metadata_write_discards_uploaded_file() {
    let ctx = create_test_state(MockRepoControl {
        fail_resource_writes: true,
        ..MockRepoControl::default()
    })
    .await;
    seed_user(&ctx.state, "root@neonsec.io").await;
    let token = ctx.state.tokens.issue_token("root@neonsec.io").unwrap();

    let response = create_router(ctx.state.clone())
        .oneshot(multipart_upload(&token, "cat.png", PNG_BYTES))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(stored_files(&ctx.uploads, "images"), 0);
}

#[test]
async fn test_upload_through_router_stores_file() {
    let ctx = create_test_state(MockRepoControl::default()).await;
    seed_user(&ctx.state, "root@neonsec.io").await;
    let token = ctx.state.tokens.issue_token("root@neonsec.io").unwrap();

    let response = create_router(ctx.state.clone())
        .oneshot(multipart_upload(&token, "cat.png", PNG_BYTES))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(stored_files(&ctx.uploads, "images"), 1);
}

#[test]
async fn test_delete_resource_with_missing_backing_file() {
    let ctx = create_test_state(MockRepoControl::default()).await;
    let admin = seed_user(&ctx.state, "root@neonsec.io").await;

    // A record whose file vanished from disk can still be deleted.
    let resource = Resource {
        id: Uuid::new_v4(),
        name: "Orphan".to_string(),
        description: "File already gone from disk.".to_string(),
        resource_type: neonsec_blog::models::ResourceType::Image,
        file_path: Some("images/gone.png".to_string()),
        download_url: Some("/api/resources/download/gone.png".to_string()),
        file_size: Some(1),
        file_hash: Some("00".to_string()),
        mime_type: Some("image/png".to_string()),
        uploaded_by: admin.id,
        ..Resource::default()
    };
    let resource = ctx.state.repo.create_resource(resource).await.unwrap();

    let result = handlers::delete_resource(
        AdminUser(admin),
        State(ctx.state.clone()),
        Path(resource.id.to_string()),
    )
    .await;
    assert!(result.is_ok());
    assert!(ctx.state.repo.get_resource(resource.id).await.unwrap().is_none());
}

// --- Error Responses ---

#[test]
async fn test_error_status_mapping() {
    let cases: Vec<(ApiError, StatusCode)> = vec![
        (
            ValidationErrors::single("title", "too short").into(),
            StatusCode::BAD_REQUEST,
        ),
        (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
        (ApiError::InvalidCredentials, StatusCode::UNAUTHORIZED),
        (ApiError::Forbidden("nope"), StatusCode::FORBIDDEN),
        (ApiError::NotFound("Post"), StatusCode::NOT_FOUND),
        (ApiError::Conflict("taken"), StatusCode::CONFLICT),
        (
            IntakeError::TooLarge { limit: 1 }.into(),
            StatusCode::BAD_REQUEST,
        ),
        (
            IntakeError::Storage(StorageError::InvalidPath("x".into())).into(),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            RepositoryError::Unavailable("down".into()).into(),
            StatusCode::SERVICE_UNAVAILABLE,
        ),
        (
            RepositoryError::MissingReference("Post").into(),
            StatusCode::NOT_FOUND,
        ),
        (
            ApiError::Internal("boom".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, expected) in cases {
        let response = error.into_response();
        assert_eq!(response.status(), expected);
        let has_challenge = response.headers().contains_key(header::WWW_AUTHENTICATE);
        assert_eq!(has_challenge, expected == StatusCode::UNAUTHORIZED);
    }
}

#[test]
async fn test_internal_error_details_are_hidden() {
    let response = ApiError::Internal("password=hunter2 leaked".into()).into_response();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, serde_json::json!({ "detail": "Internal server error" }));
}
