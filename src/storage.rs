use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

/// StorageDir
///
/// The only subdirectories of the upload root the store will touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDir {
    Images,
    Documents,
}

impl StorageDir {
    /// Lookup order for downloads.
    pub const ALL: [StorageDir; 2] = [StorageDir::Images, StorageDir::Documents];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageDir::Images => "images",
            StorageDir::Documents => "documents",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("refusing path outside the storage subdirectories: {0}")]
    InvalidPath(String),
}

// 1. FileStore Contract
/// FileStore
///
/// Defines the contract for the file store backing uploaded resources. Paths
/// handed out and accepted are relative to the store root (`images/<name>`),
/// so no caller ever builds a filesystem path from client input.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Creates the storage subdirectories if they are missing. Called at startup.
    async fn ensure_layout(&self) -> Result<(), StorageError>;

    /// Writes `bytes` as `dir/name` and returns the relative path. Either the whole
    /// file appears under its final name or nothing does.
    async fn put(&self, dir: StorageDir, name: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Removes a previously stored file. A file that is already gone is not an error.
    async fn remove(&self, relative_path: &str) -> Result<(), StorageError>;

    /// Resolves a bare stored name against the storage subdirectories, in order.
    async fn find(&self, name: &str) -> Result<Option<PathBuf>, StorageError>;
}

/// FileStoreState
///
/// The concrete type used to share the file store across the application state.
pub type FileStoreState = Arc<dyn FileStore>;

// 2. The Real Implementation (local filesystem)
/// LocalFileStore
///
/// Stores files below a root directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_path(&self, dir: StorageDir) -> PathBuf {
        self.root.join(dir.as_str())
    }

    /// resolve
    ///
    /// Maps a relative `dir/name` path onto the root, rejecting anything that is not
    /// exactly one known subdirectory followed by one normal file name.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf, StorageError> {
        let components: Vec<Component<'_>> = Path::new(relative_path).components().collect();
        match components.as_slice() {
            [Component::Normal(dir), Component::Normal(_)]
                if StorageDir::ALL.iter().any(|d| d.as_str() == *dir) =>
            {
                Ok(self.root.join(relative_path))
            }
            _ => Err(StorageError::InvalidPath(relative_path.to_string())),
        }
    }
}

fn is_bare_name(name: &str) -> bool {
    matches!(
        Path::new(name).components().collect::<Vec<_>>().as_slice(),
        [Component::Normal(_)]
    )
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn ensure_layout(&self) -> Result<(), StorageError> {
        for dir in StorageDir::ALL {
            fs::create_dir_all(self.dir_path(dir)).await?;
        }
        Ok(())
    }

    /// put
    ///
    /// Writes to a hidden temporary sibling first and renames it into place, so a
    /// failed or interrupted write never leaves a partial file under the final name.
    async fn put(&self, dir: StorageDir, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        if !is_bare_name(name) {
            return Err(StorageError::InvalidPath(name.to_string()));
        }

        let dir_path = self.dir_path(dir);
        fs::create_dir_all(&dir_path).await?;

        let final_path = dir_path.join(name);
        let temp_path = dir_path.join(format!(".{}.part", Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::error!("failed to remove partial upload {:?}: {:?}", temp_path, cleanup);
                }
            }
            return Err(e.into());
        }

        Ok(format!("{}/{}", dir.as_str(), name))
    }

    async fn remove(&self, relative_path: &str) -> Result<(), StorageError> {
        let path = self.resolve(relative_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("file {} already absent during removal", relative_path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, name: &str) -> Result<Option<PathBuf>, StorageError> {
        if !is_bare_name(name) {
            return Ok(None);
        }
        for dir in StorageDir::ALL {
            let candidate = self.dir_path(dir).join(name);
            if fs::try_exists(&candidate).await? && fs::metadata(&candidate).await?.is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}
