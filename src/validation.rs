//! Field-level input validation.
//!
//! Every check reports a `FieldError` naming the offending field instead of
//! aborting on the first problem, so handlers can answer with one 400 listing
//! every violated constraint. Title, content, names and URLs are strict: a bad
//! value rejects the whole write. Tag cleaning is lenient: malformed tags are
//! dropped and the rest of the write goes through.

use serde::Serialize;
use std::fmt;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::models::{CreateCommentRequest, CreateLinkResourceRequest, CreatePostRequest};

pub const TITLE_MIN: usize = 5;
pub const TITLE_MAX: usize = 200;
pub const POST_CONTENT_MIN: usize = 10;
pub const POST_CONTENT_MAX: usize = 10_000;
pub const MAX_TAGS: usize = 10;
pub const TAG_MAX_LEN: usize = 50;
pub const COMMENT_MIN: usize = 1;
pub const COMMENT_MAX: usize = 1_000;
pub const RESOURCE_NAME_MIN: usize = 3;
pub const RESOURCE_NAME_MAX: usize = 100;
pub const RESOURCE_DESCRIPTION_MIN: usize = 10;
pub const RESOURCE_DESCRIPTION_MAX: usize = 500;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 128;
pub const EMAIL_MAX: usize = 254;

const FORBIDDEN_TITLE_CHARS: [char; 4] = ['<', '>', '"', '\''];

/// FieldError
///
/// One violated constraint, scoped to the request field that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// ValidationErrors
///
/// The non-empty list of problems found in one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// True when at least one error is attached to `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// Turns the collected list into the final verdict for a payload.
    fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

// --- Validated Drafts ---

/// PostDraft
///
/// A post payload that passed validation, with normalized title, content and tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDraft {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDraft {
    pub name: String,
    pub description: String,
    pub external_url: String,
    pub is_featured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsDraft {
    pub email: String,
    pub password: String,
}

// --- Entity Validators ---

/// validate_post
///
/// Title and content are strict; tags are cleaned leniently, but more than
/// `MAX_TAGS` submitted tags is an error on `tags`.
pub fn validate_post(req: &CreatePostRequest) -> Result<PostDraft, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let title = req.title.trim();
    check_title(title, &mut errors);

    let content = req.content.trim();
    check_length(
        "content",
        content,
        POST_CONTENT_MIN,
        POST_CONTENT_MAX,
        &mut errors,
    );

    if req.tags.len() > MAX_TAGS {
        errors.push("tags", format!("at most {MAX_TAGS} tags are allowed"));
    }

    errors.finish(PostDraft {
        title: title.to_string(),
        content: content.to_string(),
        tags: clean_tags(&req.tags),
    })
}

pub fn validate_comment(req: &CreateCommentRequest) -> Result<CommentDraft, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let content = req.content.trim();
    check_length("content", content, COMMENT_MIN, COMMENT_MAX, &mut errors);
    errors.finish(CommentDraft {
        content: content.to_string(),
    })
}

/// validate_resource_meta
///
/// Name and description shared by uploads and links.
pub fn validate_resource_meta(
    name: &str,
    description: &str,
) -> Result<ResourceDraft, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let draft = resource_meta(name, description, &mut errors);
    errors.finish(draft)
}

pub fn validate_link(req: &CreateLinkResourceRequest) -> Result<LinkDraft, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let meta = resource_meta(&req.name, &req.description, &mut errors);

    let external_url = req.external_url.trim();
    if !is_http_url(external_url) {
        errors.push(
            "external_url",
            "must be an absolute URL starting with http:// or https://",
        );
    }

    errors.finish(LinkDraft {
        name: meta.name,
        description: meta.description,
        external_url: external_url.to_string(),
        is_featured: req.is_featured,
    })
}

/// validate_registration
///
/// Normalizes the email (trimmed, lower-cased) and enforces password length.
pub fn validate_registration(
    email: &str,
    password: &str,
) -> Result<CredentialsDraft, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let email = normalize_email(email);
    if !is_plausible_email(&email) {
        errors.push("email", "must be a valid email address");
    }

    let password_len = password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&password_len) {
        errors.push(
            "password",
            format!("must be between {PASSWORD_MIN} and {PASSWORD_MAX} characters"),
        );
    }

    errors.finish(CredentialsDraft {
        email,
        password: password.to_string(),
    })
}

// --- Field Rules ---

/// clean_tags
///
/// Trims and lower-cases each tag, drops anything that is empty, longer than
/// `TAG_MAX_LEN`, or outside `[a-z0-9_-]`, and collapses duplicates keeping the
/// first occurrence. Never fails.
pub fn clean_tags(raw: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(raw.len().min(MAX_TAGS));
    for tag in raw {
        let tag = tag.trim().to_lowercase();
        if is_valid_tag(&tag) && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.chars().count() <= TAG_MAX_LEN
        && tag
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn check_title(title: &str, errors: &mut ValidationErrors) {
    check_length("title", title, TITLE_MIN, TITLE_MAX, errors);
    if title.contains(FORBIDDEN_TITLE_CHARS) {
        errors.push("title", "must not contain <, >, \" or '");
    }
}

fn resource_meta(name: &str, description: &str, errors: &mut ValidationErrors) -> ResourceDraft {
    let name = name.trim();
    let description = description.trim();
    check_length("name", name, RESOURCE_NAME_MIN, RESOURCE_NAME_MAX, errors);
    check_length(
        "description",
        description,
        RESOURCE_DESCRIPTION_MIN,
        RESOURCE_DESCRIPTION_MAX,
        errors,
    );
    ResourceDraft {
        name: name.to_string(),
        description: description.to_string(),
    }
}

// Lengths are counted in characters, not bytes.
fn check_length(field: &str, value: &str, min: usize, max: usize, errors: &mut ValidationErrors) {
    let len = value.chars().count();
    if len < min || len > max {
        errors.push(field, format!("must be between {min} and {max} characters"));
    }
}

/// is_http_url
///
/// Scheme check only: `http://` or `https://` followed by a non-empty host with
/// no whitespace. The server never dereferences the URL.
pub fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !url.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    if email.len() > EMAIL_MAX || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
