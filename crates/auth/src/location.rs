use std::sync::{Arc, Mutex, PoisonError};

use tilshare_core::auth::Location;
use url::Url;

/// Address bar kept in memory. Clones share the same URL.
#[derive(Debug, Clone)]
pub struct MemoryLocation {
    current: Arc<Mutex<Url>>,
}

impl MemoryLocation {
    pub fn new(url: Url) -> Self {
        Self {
            current: Arc::new(Mutex::new(url)),
        }
    }
}

impl Location for MemoryLocation {
    fn current_url(&self) -> Url {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_url(&self, url: Url) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = url;
    }
}
