use std::path::{Component, Path, PathBuf};

use rocket::tokio::fs;
use tracing::{info, instrument};

use crate::error::AppError;

/// Blob storage boundary: save/fetch/delete by relative path. Callers treat
/// stored artifacts (thumbnails, lesson resources, certificate files) as
/// opaque bytes.
#[rocket::async_trait]
pub trait FileStore: Send + Sync {
    async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), AppError>;
    async fn load(&self, path: &str) -> Result<Vec<u8>, AppError>;
    async fn delete(&self, path: &str) -> Result<(), AppError>;
}

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "storage".to_string());
        Self::new(root)
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(path);

        // Stored paths are always relative and must stay under the root.
        let escapes_root = relative.components().any(|component| {
            matches!(component, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });

        if escapes_root || path.is_empty() {
            return Err(AppError::Validation(format!(
                "Invalid storage path: {}",
                path
            )));
        }

        Ok(self.root.join(relative))
    }
}

#[rocket::async_trait]
impl FileStore for LocalFileStore {
    #[instrument(skip(self, bytes))]
    async fn save(&self, path: &str, bytes: &[u8]) -> Result<(), AppError> {
        let full_path = self.resolve(path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::Internal(format!("Storage error: {}", err)))?;
        }

        fs::write(&full_path, bytes)
            .await
            .map_err(|err| AppError::Internal(format!("Storage error: {}", err)))?;

        info!(path = %path, size = bytes.len(), "Stored file");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, path: &str) -> Result<Vec<u8>, AppError> {
        let full_path = self.resolve(path)?;

        fs::read(&full_path)
            .await
            .map_err(|_| AppError::NotFound(format!("File {} not found", path)))
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<(), AppError> {
        let full_path = self.resolve(path)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            // Deleting something already gone is not an error worth surfacing.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Internal(format!("Storage error: {}", err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escaping_paths() {
        let store = LocalFileStore::new("storage");

        assert!(store.resolve("certificates/CH-1.pdf").is_ok());
        assert!(store.resolve("../outside.txt").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
    }
}
