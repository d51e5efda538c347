use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage I/O failed")]
    Io(#[from] std::io::Error),

    #[error("storage request failed")]
    Http(#[from] reqwest::Error),

    #[error("storage backend returned an unusable response: {0}")]
    Unexpected(String),
}

/// Object store for original and filled PDFs.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;
}

/// Directory-backed storage for local runs and tests.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &target).await?;
        Ok(format!("file://{}", target.display()))
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let source = self.object_path(key);
        if !tokio::fs::try_exists(&source).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        tokio::fs::copy(&source, local_path).await?;
        Ok(())
    }

    async fn signed_url(&self, key: &str, _expires_in: Duration) -> Result<String, StorageError> {
        let source = self.object_path(key);
        if !tokio::fs::try_exists(&source).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(format!("file://{}", source.display()))
    }
}

/// Supabase-style REST object storage.
pub struct HttpStorage {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    service_key: String,
}

impl HttpStorage {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        service_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            service_key: service_key.into(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, key
        )
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let body = tokio::fs::read(local_path).await?;
        let response = self
            .client
            .post(self.object_url(key))
            .bearer_auth(&self.service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(body)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        ))
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let response = self
            .client
            .get(self.object_url(key))
            .bearer_auth(&self.service_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let bytes = response.error_for_status()?.bytes().await?;
        tokio::fs::write(local_path, &bytes).await?;
        Ok(())
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let response = self
            .client
            .post(format!(
                "{}/storage/v1/object/sign/{}/{}",
                self.base_url, self.bucket, key
            ))
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "expiresIn": expires_in.as_secs() }))
            .send()
            .await?;
        let payload: serde_json::Value = response.error_for_status()?.json().await?;
        let signed_path = payload["signedURL"]
            .as_str()
            .ok_or_else(|| StorageError::Unexpected("missing signedURL".into()))?;
        Ok(format!("{}/storage/v1{}", self.base_url, signed_path))
    }
}
