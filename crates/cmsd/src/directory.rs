//! Content id → process id mapping.

use cms_core::types::{ContentId, WorkflowId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::persistence::{PersistenceError, SqliteStore};

type LockMap = Arc<Mutex<HashMap<ContentId, Arc<AsyncMutex<()>>>>>;

/// Read side of the directory plus the per-content start lock. Entries are
/// written only together with their process, by the store.
#[derive(Debug, Clone)]
pub struct WorkflowDirectory {
    store: Arc<SqliteStore>,
    locks: LockMap,
}

impl WorkflowDirectory {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn lookup(&self, content_id: &ContentId) -> Result<Option<WorkflowId>, PersistenceError> {
        Ok(self
            .store
            .lookup_directory(content_id)?
            .map(|entry| entry.workflow_id))
    }

    /// Serializes starts for one content id within this process.
    pub async fn lock_content(&self, content_id: &ContentId) -> ContentLock {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(content_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ContentLock {
            content_id: content_id.clone(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }
}

/// Held while a start for one content id is in flight. The lock's map entry
/// is dropped with the last holder or waiter.
#[derive(Debug)]
pub struct ContentLock {
    content_id: ContentId,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ContentLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.content_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.content_id);
        }
    }
}
