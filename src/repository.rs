use crate::{
    config::AppConfig,
    models::{Comment, Post, Resource, ResourceType, Role, TagCount, User},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    PgPool, Postgres, QueryBuilder,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::{
    cmp::Reverse,
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const POST_LIST_LIMIT: i64 = 100;
pub const COMMENT_LIST_LIMIT: i64 = 100;
pub const RESOURCE_LIST_LIMIT: i64 = 100;
pub const POPULAR_TAGS_LIMIT: i64 = 20;

/// RepositoryError
///
/// Persistence failures. None of them are retried: they fail the current request.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A unique constraint rejected the write (e.g. a duplicate email).
    #[error("{0}")]
    Conflict(&'static str),
    /// A referenced parent row vanished between the existence check and the write.
    #[error("{0} not found")]
    MissingReference(&'static str),
    /// The store cannot be reached (pool timeout/closed, I/O).
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => RepositoryError::Unavailable(e.to_string()),
            other => RepositoryError::Database(other),
        }
    }
}

/// PostQuery
///
/// Filters for the public post listing. `tag` is matched exactly (tags are stored
/// lower-cased); `search` is a case-insensitive substring over title, content and tags.
#[derive(Debug, Clone)]
pub struct PostQuery {
    pub tag: Option<String>,
    pub search: Option<String>,
    pub limit: i64,
}

impl Default for PostQuery {
    fn default() -> Self {
        Self {
            tag: None,
            search: None,
            limit: POST_LIST_LIMIT,
        }
    }
}

/// ResourceQuery
///
/// Filters for the public resource listing. `search` matches name and description.
#[derive(Debug, Clone)]
pub struct ResourceQuery {
    pub resource_type: Option<ResourceType>,
    pub search: Option<String>,
    pub featured_only: bool,
    pub limit: i64,
}

impl Default for ResourceQuery {
    fn default() -> Self {
        Self {
            resource_type: None,
            search: None,
            featured_only: false,
            limit: RESOURCE_LIST_LIMIT,
        }
    }
}

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations, so handlers never
/// know whether they talk to Postgres or to the in-memory store used by tests.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) shareable across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Round-trip to the store. Backs the readiness probe.
    async fn ping(&self) -> Result<(), RepositoryError>;

    // --- Users ---
    /// Stores a new user. The role is decided here, atomically: `Admin` when no
    /// user exists yet, `User` otherwise. A taken email is `Conflict`.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, RepositoryError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    // --- Posts ---
    async fn create_post(&self, post: Post) -> Result<Post, RepositoryError>;
    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, RepositoryError>;
    /// Newest first, capped at `query.limit`.
    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, RepositoryError>;
    /// Deletes the post's comments and then the post, as one unit. Returns false
    /// when no such post existed.
    async fn delete_post_cascade(&self, id: Uuid) -> Result<bool, RepositoryError>;
    /// Tag frequency across all posts, by descending count then tag.
    async fn popular_tags(&self, limit: i64) -> Result<Vec<TagCount>, RepositoryError>;

    // --- Comments ---
    async fn create_comment(&self, comment: Comment) -> Result<Comment, RepositoryError>;
    /// Oldest first, capped at `limit`.
    async fn get_comments(&self, post_id: Uuid, limit: i64)
    -> Result<Vec<Comment>, RepositoryError>;

    // --- Resources ---
    async fn create_resource(&self, resource: Resource) -> Result<Resource, RepositoryError>;
    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>, RepositoryError>;
    /// Featured first, then newest.
    async fn list_resources(&self, query: &ResourceQuery)
    -> Result<Vec<Resource>, RepositoryError>;
    async fn delete_resource(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// like_pattern
///
/// Wraps user input for ILIKE, escaping the wildcard characters so they match literally.
pub fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

// --- Postgres ---

const USER_COLUMNS: &str = "id, email, password_hash, role, is_active, created_at";
const POST_COLUMNS: &str = "id, title, content, tags, author, author_id, created_at";
const COMMENT_COLUMNS: &str = "id, post_id, content, author, author_id, created_at";
const RESOURCE_COLUMNS: &str = "id, name, description, resource_type, file_path, download_url, \
     file_size, file_hash, mime_type, external_url, is_featured, uploaded_by, created_at";

/// PostgresRepository
///
/// The production implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using an initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// connect
    ///
    /// Builds the pool from `DATABASE_URL`, with `DB_NAME` overriding the database
    /// named in the URL.
    pub async fn connect(config: &AppConfig) -> Result<Self, sqlx::Error> {
        let mut options = PgConnectOptions::from_str(&config.db_url)?;
        if let Some(name) = &config.db_name {
            options = options.database(name);
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded migrations in `migrations/`.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// map_write_error
///
/// Translates constraint violations into domain errors; everything else goes
/// through the generic `sqlx::Error` mapping.
fn map_write_error(e: sqlx::Error, entity: &'static str, conflict: &'static str) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(conflict);
        }
        if db.is_foreign_key_violation() {
            return RepositoryError::MissingReference(entity);
        }
    }
    e.into()
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// create_user
    ///
    /// Runs in a transaction holding a table lock that conflicts with itself, so
    /// two concurrent registrations cannot both observe an empty table.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let has_users: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users)")
            .fetch_one(&mut *tx)
            .await?;
        let role = if has_users { Role::User } else { Role::Admin };

        let sql = format!(
            "INSERT INTO users (id, email, password_hash, role, is_active, created_at) \
             VALUES ($1, $2, $3, $4, TRUE, NOW()) RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(password_hash)
            .bind(role)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, "User", "Email already registered"))?;

        tx.commit().await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_post(&self, post: Post) -> Result<Post, RepositoryError> {
        let sql = format!(
            "INSERT INTO posts ({POST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {POST_COLUMNS}"
        );
        sqlx::query_as::<_, Post>(&sql)
            .bind(post.id)
            .bind(&post.title)
            .bind(&post.content)
            .bind(&post.tags)
            .bind(&post.author)
            .bind(post.author_id)
            .bind(post.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "User", "Post already exists"))
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, RepositoryError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        Ok(sqlx::query_as::<_, Post>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// list_posts
    ///
    /// Optional filters are appended with QueryBuilder so every user value is bound,
    /// never interpolated.
    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, RepositoryError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {POST_COLUMNS} FROM posts WHERE TRUE"));

        if let Some(tag) = &query.tag {
            builder.push(" AND ");
            builder.push_bind(tag.clone());
            builder.push(" = ANY(tags)");
        }

        if let Some(search) = &query.search {
            let pattern = like_pattern(search);
            builder.push(" AND (title ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR content ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR EXISTS (SELECT 1 FROM unnest(tags) AS t(tag) WHERE t.tag ILIKE ");
            builder.push_bind(pattern);
            builder.push("))");
        }

        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(query.limit);

        Ok(builder
            .build_query_as::<Post>()
            .fetch_all(&self.pool)
            .await?)
    }

    /// delete_post_cascade
    ///
    /// Comments go first, inside the same transaction as the post, so no reader
    /// ever sees comments whose post is gone.
    async fn delete_post_cascade(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let comments = sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let posts = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        tracing::debug!("deleted post {} with {} comments", id, comments);
        Ok(posts > 0)
    }

    async fn popular_tags(&self, limit: i64) -> Result<Vec<TagCount>, RepositoryError> {
        Ok(sqlx::query_as::<_, TagCount>(
            r#"
            SELECT tag, COUNT(*) AS count
            FROM posts CROSS JOIN LATERAL unnest(tags) AS tag
            GROUP BY tag
            ORDER BY count DESC, tag ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn create_comment(&self, comment: Comment) -> Result<Comment, RepositoryError> {
        let sql = format!(
            "INSERT INTO comments ({COMMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COMMENT_COLUMNS}"
        );
        sqlx::query_as::<_, Comment>(&sql)
            .bind(comment.id)
            .bind(comment.post_id)
            .bind(&comment.content)
            .bind(&comment.author)
            .bind(comment.author_id)
            .bind(comment.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "Post", "Comment already exists"))
    }

    async fn get_comments(
        &self,
        post_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Comment>, RepositoryError> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 \
             ORDER BY created_at ASC LIMIT $2"
        );
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(post_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_resource(&self, resource: Resource) -> Result<Resource, RepositoryError> {
        let sql = format!(
            "INSERT INTO resources ({RESOURCE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {RESOURCE_COLUMNS}"
        );
        sqlx::query_as::<_, Resource>(&sql)
            .bind(resource.id)
            .bind(&resource.name)
            .bind(&resource.description)
            .bind(resource.resource_type)
            .bind(&resource.file_path)
            .bind(&resource.download_url)
            .bind(resource.file_size)
            .bind(&resource.file_hash)
            .bind(&resource.mime_type)
            .bind(&resource.external_url)
            .bind(resource.is_featured)
            .bind(resource.uploaded_by)
            .bind(resource.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "User", "Resource already exists"))
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>, RepositoryError> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1");
        Ok(sqlx::query_as::<_, Resource>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_resources(
        &self,
        query: &ResourceQuery,
    ) -> Result<Vec<Resource>, RepositoryError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE TRUE"));

        if let Some(resource_type) = query.resource_type {
            builder.push(" AND resource_type = ");
            builder.push_bind(resource_type);
        }

        if let Some(search) = &query.search {
            let pattern = like_pattern(search);
            builder.push(" AND (name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR description ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        if query.featured_only {
            builder.push(" AND is_featured = TRUE");
        }

        builder.push(" ORDER BY is_featured DESC, created_at DESC LIMIT ");
        builder.push_bind(query.limit);

        Ok(builder
            .build_query_as::<Resource>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-Memory ---

#[derive(Default)]
struct Tables {
    // Insertion order is kept; it breaks ties between equal timestamps.
    users: Vec<User>,
    posts: Vec<Post>,
    comments: Vec<Comment>,
    resources: Vec<Resource>,
}

/// InMemoryRepository
///
/// A `Repository` kept in process memory, with the same ordering, filtering and
/// cascade semantics as `PostgresRepository`. Used by the test suites and for
/// running the API without a database. Every multi-step operation happens under
/// one write lock.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable(
                "in-memory store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn take_limit<T>(items: Vec<T>, limit: i64) -> Vec<T> {
    let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    items.into_iter().take(limit).collect()
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.ensure_online()
    }

    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, RepositoryError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;

        if tables.users.iter().any(|u| u.email == email) {
            return Err(RepositoryError::Conflict("Email already registered"));
        }

        let role = if tables.users.is_empty() {
            Role::Admin
        } else {
            Role::User
        };
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role,
            is_active: true,
            created_at: Utc::now(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn create_post(&self, post: Post) -> Result<Post, RepositoryError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        if !tables.users.iter().any(|u| u.id == post.author_id) {
            return Err(RepositoryError::MissingReference("User"));
        }
        tables.posts.push(post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables.posts.iter().find(|p| p.id == id).cloned())
    }

    async fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        let needle = query.search.as_deref().map(str::to_lowercase);

        let mut posts: Vec<Post> = tables
            .posts
            .iter()
            .rev()
            .filter(|p| query.tag.as_ref().is_none_or(|tag| p.tags.contains(tag)))
            .filter(|p| {
                needle.as_deref().is_none_or(|n| {
                    contains_ci(&p.title, n)
                        || contains_ci(&p.content, n)
                        || p.tags.iter().any(|t| contains_ci(t, n))
                })
            })
            .cloned()
            .collect();
        posts.sort_by_key(|p| Reverse(p.created_at));

        Ok(take_limit(posts, query.limit))
    }

    async fn delete_post_cascade(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        tables.comments.retain(|c| c.post_id != id);
        let before = tables.posts.len();
        tables.posts.retain(|p| p.id != id);
        Ok(tables.posts.len() < before)
    }

    async fn popular_tags(&self, limit: i64) -> Result<Vec<TagCount>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;

        let mut counts: HashMap<&str, i64> = HashMap::new();
        for tag in tables.posts.iter().flat_map(|p| p.tags.iter()) {
            *counts.entry(tag.as_str()).or_insert(0) += 1;
        }

        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));

        Ok(take_limit(tags, limit))
    }

    async fn create_comment(&self, comment: Comment) -> Result<Comment, RepositoryError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        if !tables.posts.iter().any(|p| p.id == comment.post_id) {
            return Err(RepositoryError::MissingReference("Post"));
        }
        tables.comments.push(comment.clone());
        Ok(comment)
    }

    async fn get_comments(
        &self,
        post_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Comment>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(take_limit(comments, limit))
    }

    async fn create_resource(&self, resource: Resource) -> Result<Resource, RepositoryError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        tables.resources.push(resource.clone());
        Ok(resource)
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        Ok(tables.resources.iter().find(|r| r.id == id).cloned())
    }

    async fn list_resources(
        &self,
        query: &ResourceQuery,
    ) -> Result<Vec<Resource>, RepositoryError> {
        self.ensure_online()?;
        let tables = self.tables.read().await;
        let needle = query.search.as_deref().map(str::to_lowercase);

        let mut resources: Vec<Resource> = tables
            .resources
            .iter()
            .rev()
            .filter(|r| query.resource_type.is_none_or(|t| r.resource_type == t))
            .filter(|r| !query.featured_only || r.is_featured)
            .filter(|r| {
                needle
                    .as_deref()
                    .is_none_or(|n| contains_ci(&r.name, n) || contains_ci(&r.description, n))
            })
            .cloned()
            .collect();
        resources.sort_by_key(|r| (Reverse(r.is_featured), Reverse(r.created_at)));

        Ok(take_limit(resources, query.limit))
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.ensure_online()?;
        let mut tables = self.tables.write().await;
        let before = tables.resources.len();
        tables.resources.retain(|r| r.id != id);
        Ok(tables.resources.len() < before)
    }
}
