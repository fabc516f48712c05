use async_trait::async_trait;

use crate::error::ControllerError;

/// The object store for test artifacts. `download` must surface
/// `ControllerError::FileNotFound` — distinct from transport errors — for
/// missing files; that's the exempt error the retry policy short-circuits
/// on for engine trigger.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, filepath: &str) -> Result<Vec<u8>, ControllerError>;
}
