use async_trait::async_trait;

use tilshare_core::auth::{SessionStorage, StorageError};

/// Storage that rejects every access, as session storage does in some
/// private browsing modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStorage;

#[async_trait]
impl SessionStorage for UnavailableStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }
}
