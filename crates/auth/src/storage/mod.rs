//! Session storage adapters and flag persistence.
//!
//! Provides `SessionStorage` implementations for:
//! - In-memory storage (tests, server-side rendering)
//! - Unavailable storage (private browsing, storage disabled)
//!
//! Storage failures never propagate: reads degrade to "nothing persisted" and
//! writes are logged and dropped.

mod memory;
mod unavailable;

use std::collections::HashMap;

pub use memory::MemoryStorage;
pub use unavailable::UnavailableStorage;

use tilshare_core::auth::{SessionFlags, SessionStorage, FLAG_KEYS};

/// Read the persisted flag record.
pub async fn load_flags(storage: &dyn SessionStorage) -> SessionFlags {
    let mut entries = HashMap::new();

    for key in FLAG_KEYS {
        match storage.get_item(key).await {
            Ok(Some(value)) => {
                entries.insert(key.to_string(), value);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read session flag, assuming none persisted");
                return SessionFlags::default();
            }
        }
    }

    SessionFlags::from_entries(&entries)
}

/// Write the flag record through to storage.
pub async fn save_flags(storage: &dyn SessionStorage, flags: &SessionFlags) {
    for (key, value) in flags.to_entries() {
        let result = match value {
            Some(value) => storage.set_item(key, &value).await,
            None => storage.remove_item(key).await,
        };

        if let Err(e) = result {
            tracing::warn!(key, error = %e, "Failed to persist session flag");
        }
    }
}
