use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use log::trace;

/// Serializes concurrent gateway deliveries for the same trade or refund number. `try_acquire`
/// never blocks: the gateway redelivers on its own schedule, so a busy key is answered with the
/// retry-later envelope instead of holding the connection.
///
/// The lock set is process-local. Running multiple server instances against one database needs a
/// shared lock service in front of this.
#[derive(Clone, Default)]
pub struct NotifyLocks {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl NotifyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key`, or return `None` if another delivery holds it. The returned guard
    /// releases the lock when dropped, on every exit path.
    pub fn try_acquire(&self, key: &str) -> Option<NotifyLockGuard> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if keys.insert(key.to_string()) {
            trace!("🔒️ Acquired notification lock for {key}");
            Some(NotifyLockGuard { keys: Arc::clone(&self.keys), key: key.to_string() })
        } else {
            None
        }
    }
}

pub struct NotifyLockGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for NotifyLockGuard {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.remove(&self.key);
        trace!("🔓️ Released notification lock for {}", self.key);
    }
}
