//! Upload intake: size ceiling, extension allow-list, magic-number sniffing,
//! filename sanitization, storage and hashing.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    models::ResourceType,
    storage::{FileStoreState, StorageDir, StorageError},
};

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];
pub const DOCUMENT_EXTENSIONS: [&str; 1] = ["pdf"];
pub const MAX_FILENAME_LEN: usize = 100;
// A v4 UUID, an underscore and a sanitized filename.
const MAX_STORED_NAME_LEN: usize = 37 + MAX_FILENAME_LEN;

const PDF_MAGIC: &[u8] = b"%PDF-";
const PDF_MIME: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("file exceeds the maximum upload size of {limit} bytes")]
    TooLarge { limit: usize },
    #[error("unsupported file type '{0}'; allowed: .jpg, .jpeg, .png, .gif, .webp, .pdf")]
    UnsupportedType(String),
    #[error("file content does not match its .{extension} extension")]
    ContentMismatch { extension: String },
    #[error("no file was provided")]
    MissingFile,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// FileKind
///
/// What an accepted upload is, decided by its extension and confirmed by sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Document,
}

impl FileKind {
    pub fn storage_dir(self) -> StorageDir {
        match self {
            FileKind::Image => StorageDir::Images,
            FileKind::Document => StorageDir::Documents,
        }
    }

    pub fn resource_type(self) -> ResourceType {
        match self {
            FileKind::Image => ResourceType::Image,
            FileKind::Document => ResourceType::Pdf,
        }
    }
}

/// StoredFile
///
/// Everything the resource record needs about a file that made it to the store.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub kind: FileKind,
    pub stored_name: String,
    // Relative to the store root, e.g. `images/<uuid>_cat.png`.
    pub relative_path: String,
    pub download_url: String,
    pub size: i64,
    // Hex SHA-256 of the stored bytes.
    pub hash: String,
    pub mime_type: &'static str,
}

/// classify_extension
///
/// Lower-cased extension of the client filename and the kind it maps to.
pub fn classify_extension(filename: &str) -> Result<(String, FileKind), IntakeError> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Ok((extension, FileKind::Image))
    } else if DOCUMENT_EXTENSIONS.contains(&extension.as_str()) {
        Ok((extension, FileKind::Document))
    } else {
        Err(IntakeError::UnsupportedType(if extension.is_empty() {
            "(none)".to_string()
        } else {
            format!(".{extension}")
        }))
    }
}

/// sniff_content_type
///
/// Content type from the leading bytes alone. Returns `None` for anything that is
/// neither a supported image format nor a PDF.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(PDF_MIME);
    }
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn content_matches(kind: FileKind, sniffed: &str) -> bool {
    match kind {
        FileKind::Image => sniffed.starts_with("image/"),
        FileKind::Document => sniffed == PDF_MIME,
    }
}

/// sanitize_filename
///
/// Keeps only the last path component, replaces everything outside
/// `[A-Za-z0-9._-]` with `_`, strips leading dots and caps the length while
/// keeping the extension. Mandatory before any filesystem write.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let replaced: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_start_matches('.');

    // No leading dots remain, so a split always leaves a non-empty stem.
    let (stem, extension) = match trimmed.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None if trimmed.is_empty() => ("file", None),
        None => (trimmed, None),
    };

    // All remaining characters are ASCII, so byte lengths equal char counts.
    match extension {
        Some(ext) => {
            let ext: String = ext.chars().take(MAX_FILENAME_LEN / 2).collect();
            let room = MAX_FILENAME_LEN.saturating_sub(ext.len() + 1);
            let stem: String = stem.chars().take(room.max(1)).collect();
            format!("{stem}.{ext}")
        }
        None => stem.chars().take(MAX_FILENAME_LEN).collect(),
    }
}

/// is_servable_name
///
/// True when a requested download name is a single component made only of
/// sanitized characters, so it can only point inside a storage subdirectory.
pub fn is_servable_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_STORED_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub fn download_url(stored_name: &str) -> String {
    format!("/api/resources/download/{stored_name}")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// FileIntake
///
/// Accepts an uploaded file in full, or leaves the store untouched.
#[derive(Clone)]
pub struct FileIntake {
    store: FileStoreState,
    max_bytes: usize,
}

impl FileIntake {
    pub fn new(store: FileStoreState, max_bytes: usize) -> Self {
        Self { store, max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// check
    ///
    /// All validation steps that do not touch the store: size, extension, sniffing.
    pub fn check(&self, filename: &str, bytes: &[u8]) -> Result<(FileKind, &'static str), IntakeError> {
        if bytes.len() > self.max_bytes {
            return Err(IntakeError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let (extension, kind) = classify_extension(filename)?;

        let sniffed = sniff_content_type(bytes);
        match sniffed.filter(|mime| content_matches(kind, mime)) {
            Some(mime_type) => Ok((kind, mime_type)),
            None => {
                tracing::warn!(
                    "upload '{}' rejected: extension .{} but content sniffed as {:?}",
                    filename,
                    extension,
                    sniffed
                );
                Err(IntakeError::ContentMismatch { extension })
            }
        }
    }

    /// accept
    ///
    /// Runs `check`, writes the file under a fresh `<uuid>_<sanitized>` name and
    /// hashes the stored bytes.
    pub async fn accept(&self, filename: &str, bytes: &[u8]) -> Result<StoredFile, IntakeError> {
        let (kind, mime_type) = self.check(filename, bytes)?;

        let stored_name = format!("{}_{}", Uuid::new_v4(), sanitize_filename(filename));
        let relative_path = self.store.put(kind.storage_dir(), &stored_name, bytes).await?;

        let stored = StoredFile {
            kind,
            download_url: download_url(&stored_name),
            stored_name,
            relative_path,
            size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
            hash: sha256_hex(bytes),
            mime_type,
        };

        tracing::info!(
            "stored upload {} ({} bytes, sha256 {})",
            stored.relative_path,
            stored.size,
            stored.hash
        );
        Ok(stored)
    }

    /// discard
    ///
    /// Removes a stored file whose metadata could not be recorded.
    pub async fn discard(&self, stored: &StoredFile) {
        if let Err(e) = self.store.remove(&stored.relative_path).await {
            tracing::error!("failed to discard orphaned upload {}: {:?}", stored.relative_path, e);
        }
    }
}
