use super::object_store::ObjectStore;
use crate::error::{AppError, AppResult};
use crate::types::is_valid_id;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON documents stored one per object under a fixed prefix
/// (`<prefix><id>.json`).
#[derive(Clone)]
pub struct Collection {
    store: ObjectStore,
    prefix: &'static str,
    label: &'static str,
}

impl Collection {
    pub fn new(store: ObjectStore, prefix: &'static str, label: &'static str) -> Self {
        Self {
            store,
            prefix,
            label,
        }
    }

    fn key(&self, id: &str) -> AppResult<String> {
        if !is_valid_id(id) {
            return Err(AppError::Validation(format!(
                "invalid {} id: {id:?}",
                self.label
            )));
        }
        Ok(format!("{}{id}.json", self.prefix))
    }

    pub async fn get<T: DeserializeOwned>(&self, id: &str) -> AppResult<Option<T>> {
        let key = self.key(id)?;
        Ok(self.store.get_json(&key).await?)
    }

    /// Like `get`, but a missing document is a 404.
    pub async fn require<T: DeserializeOwned>(&self, id: &str) -> AppResult<T> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {id} not found", self.label)))
    }

    pub async fn exists(&self, id: &str) -> AppResult<bool> {
        let key = self.key(id)?;
        Ok(self.store.get(&key).await?.is_some())
    }

    pub async fn list<T: DeserializeOwned>(&self) -> AppResult<Vec<T>> {
        Ok(self.store.list_json(self.prefix).await?)
    }

    pub async fn put<T: Serialize>(&self, id: &str, value: &T) -> AppResult<()> {
        let key = self.key(id)?;
        self.store.put_json(&key, value).await?;
        tracing::info!(kind = self.label, id = %id, "document saved");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        if !self.exists(id).await? {
            return Err(AppError::NotFound(format!("{} {id} not found", self.label)));
        }
        let key = self.key(id)?;
        self.store.delete(&key).await?;
        tracing::info!(kind = self.label, id = %id, "document deleted");
        Ok(())
    }
}
