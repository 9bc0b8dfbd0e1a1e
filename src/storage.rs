//! File storage for uploaded images, mirroring
//! `original_source/apps/api/app/services/storage.py`'s `StorageService` /
//! `LocalStorageService` pair. Only the local variant is implemented; the
//! trait is the seam a future S3/Supabase backend would hang off.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
pub trait StorageService: Send + Sync {
    async fn save(&self, filename: &str, content: &[u8]) -> Result<String, StorageError>;
    async fn delete(&self, filename: &str) -> Result<bool, StorageError>;
    fn get_url(&self, filename: &str) -> String;
}

pub struct LocalStorageService {
    upload_dir: PathBuf,
}

impl LocalStorageService {
    pub async fn new(upload_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let upload_dir = upload_dir.into();
        tokio::fs::create_dir_all(&upload_dir).await?;
        Ok(Self { upload_dir })
    }

    pub fn absolute_path(&self, filename: &str) -> PathBuf {
        self.upload_dir.join(filename)
    }
}

#[async_trait::async_trait]
impl StorageService for LocalStorageService {
    async fn save(&self, filename: &str, content: &[u8]) -> Result<String, StorageError> {
        let path = self.upload_dir.join(filename);
        tokio::fs::write(&path, content).await?;
        Ok(self.get_url(filename))
    }

    async fn delete(&self, filename: &str) -> Result<bool, StorageError> {
        let path = self.upload_dir.join(filename);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn get_url(&self, filename: &str) -> String {
        format!("/uploads/{filename}")
    }
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_delete_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("plate-recog-test-{:p}", &0u8));
        let storage = LocalStorageService::new(&dir).await.unwrap();

        let url = storage.save("plate.jpg", b"fake-jpeg-bytes").await.unwrap();
        assert_eq!(url, "/uploads/plate.jpg");
        assert!(Path::new(&storage.absolute_path("plate.jpg")).exists());

        let deleted = storage.delete("plate.jpg").await.unwrap();
        assert!(deleted);
        assert!(!Path::new(&storage.absolute_path("plate.jpg")).exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn content_type_check_accepts_only_image_prefix() {
        assert!(is_image_content_type("image/jpeg"));
        assert!(is_image_content_type("image/png"));
        assert!(!is_image_content_type("application/pdf"));
    }
}
