use super::fs::FsStore;
use super::s3::S3Store;
use crate::config::{StorageBackend, StorageConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("s3 request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("s3 returned {status} for {key}: {body}")]
    Status {
        status: u16,
        key: String,
        body: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON in {key}: {source}")]
    Json {
        key: String,
        source: serde_json::Error,
    },

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("storage misconfigured: {0}")]
    Config(String),
}

/// JSON blob storage. S3 in production, a local directory for development
/// and tests. Both expose the same flat key space (`charts/<id>.json`, ...).
#[derive(Clone)]
pub enum ObjectStore {
    S3(S3Store),
    Fs(FsStore),
}

/// Keys are relative, slash separated, and never climb out of the root.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg == ".." || seg == ".")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

impl ObjectStore {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StoreError> {
        match config.backend {
            StorageBackend::S3 => Ok(ObjectStore::S3(S3Store::new(config)?)),
            StorageBackend::Fs => Ok(ObjectStore::Fs(FsStore::new(config.local_dir.clone()))),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            ObjectStore::S3(_) => "s3",
            ObjectStore::Fs(_) => "fs",
        }
    }

    pub async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        validate_key(key)?;
        match self {
            ObjectStore::S3(s3) => s3.put(key, body, "application/json").await,
            ObjectStore::Fs(fs) => fs.put(key, &body).await,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        match self {
            ObjectStore::S3(s3) => s3.get(key).await,
            ObjectStore::Fs(fs) => fs.get(key).await,
        }
    }

    /// Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match self {
            ObjectStore::S3(s3) => s3.delete(key).await,
            ObjectStore::Fs(fs) => fs.delete(key).await,
        }
    }

    /// All keys under `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = match self {
            ObjectStore::S3(s3) => s3.list(prefix).await?,
            ObjectStore::Fs(fs) => fs.list(prefix).await?,
        };
        keys.sort();
        Ok(keys)
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.put(key, body).await?;
        tracing::debug!(key = %key, backend = self.backend_name(), "object saved");
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Load every JSON object under `prefix`. Unreadable objects are logged
    /// and skipped so one corrupt file does not blank a whole listing.
    pub async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let keys: Vec<String> = self
            .list(prefix)
            .await?
            .into_iter()
            .filter(|k| k.ends_with(".json"))
            .collect();

        let loaded = futures::future::join_all(keys.iter().map(|k| self.get_json::<T>(k))).await;

        let mut items = Vec::with_capacity(loaded.len());
        for (key, result) in keys.iter().zip(loaded) {
            match result {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable object"),
            }
        }
        Ok(items)
    }

    /// Cheap reachability probe used by the health endpoints.
    pub async fn ping(&self) -> bool {
        match self {
            ObjectStore::S3(s3) => s3.list_page("config/", None, 1).await.is_ok(),
            ObjectStore::Fs(fs) => fs.root_exists().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("charts/abc.json").is_ok());
        assert!(validate_key("blog-analytics/my-post.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("charts/../../etc").is_err());
        assert!(validate_key("charts\\x").is_err());
    }

    #[tokio::test]
    async fn test_json_helpers_on_fs_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::Fs(FsStore::new(dir.path().to_path_buf()));

        store
            .put_json("charts/a.json", &serde_json::json!({"id": "a"}))
            .await
            .unwrap();
        store
            .put_json("charts/b.json", &serde_json::json!({"id": "b"}))
            .await
            .unwrap();
        store.put("charts/broken.json", b"{".to_vec()).await.unwrap();

        let items: Vec<serde_json::Value> = store.list_json("charts/").await.unwrap();
        assert_eq!(items.len(), 2);

        let missing: Option<serde_json::Value> = store.get_json("charts/zzz.json").await.unwrap();
        assert!(missing.is_none());

        assert!(matches!(
            store.get_json::<serde_json::Value>("charts/broken.json").await,
            Err(StoreError::Json { .. })
        ));
    }
}
