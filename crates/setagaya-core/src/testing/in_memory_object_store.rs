use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ControllerError;
use crate::interfaces::ObjectStore;

/// In-process `ObjectStore`. Files are seeded via `put`; `download` of an
/// unseeded path returns `ControllerError::FileNotFound`, the exempt error
/// the retry policy short-circuits on.
#[derive(Default)]
pub struct InMemoryObjectStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, filepath: impl Into<String>, contents: Vec<u8>) {
        self.files.write().await.insert(filepath.into(), contents);
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn download(&self, filepath: &str) -> Result<Vec<u8>, ControllerError> {
        self.files
            .read()
            .await
            .get(filepath)
            .cloned()
            .ok_or_else(|| ControllerError::FileNotFound(filepath.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn downloads_seeded_file() {
        let store = InMemoryObjectStore::new();
        store.put("plan.jmx", b"<xml/>".to_vec()).await;
        let bytes = store.download("plan.jmx").await.unwrap();
        assert_eq!(bytes, b"<xml/>");
    }

    #[tokio::test]
    async fn missing_file_is_file_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.download("missing.csv").await.unwrap_err();
        assert!(matches!(err, ControllerError::FileNotFound(_)));
    }
}
