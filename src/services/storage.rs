use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

/// A keyed blob store: source images, scratch artifacts, generated models.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] when the key is absent.
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Check that a client-supplied name is a single plain path segment.
pub fn validate_file_name(name: &str) -> Result<(), StorageError> {
    let plain = !name.is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
        && !name.contains('\0');
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(name.to_string()))
    }
}

/// Stricter rule for names that end up in a URL path: ASCII letters, digits,
/// `.`, `-` and `_` only.
pub fn validate_output_name(name: &str) -> Result<(), StorageError> {
    validate_file_name(name)?;
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(name.to_string()))
    }
}

/// Object store rooted at a directory on the local filesystem.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Creates `root` if it does not exist yet.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a `/`-separated key onto a path below the root.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false))
    }

    async fn upload(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
///
/// Several stores can share one bucket by using different key prefixes.
pub struct R2Store {
    bucket: Box<Bucket>,
    prefix: String,
}

impl R2Store {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        prefix: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    fn object_path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl ObjectStore for R2Store {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.bucket.head_object(self.object_path(key)).await {
            Ok((_, code)) if (200..300).contains(&code) => Ok(true),
            Ok((_, 404)) => Ok(false),
            Ok((_, code)) => Err(StorageError::Status(code)),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(self.object_path(key), data, content_type)
            .await?;
        match response.status_code() {
            200..=299 => Ok(()),
            code => Err(StorageError::Status(code)),
        }
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = match self.bucket.get_object(self.object_path(key)).await {
            Ok(response) => response,
            Err(S3Error::HttpFailWithBody(404, _)) => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        match response.status_code() {
            200..=299 => Ok(response.to_vec()),
            404 => Err(StorageError::NotFound(key.to_string())),
            code => Err(StorageError::Status(code)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.bucket.delete_object(self.object_path(key)).await {
            Ok(_) | Err(S3Error::HttpFailWithBody(404, _)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("S3 request returned status {0}")]
    Status(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
