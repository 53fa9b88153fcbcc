use crate::state::CrawlSnapshot;
use crate::storage::traits::{StorageAdapter, StorageResult};
use crate::storage::RunStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Process-local storage; clones share the same snapshots
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshots: HashMap<String, CrawlSnapshot>,
    saves: usize,
    finished: HashMap<String, RunStatus>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, domain: &str) -> Option<CrawlSnapshot> {
        self.lock().snapshots.get(domain).cloned()
    }

    /// Number of successful saves so far
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    pub fn status(&self, domain: &str) -> Option<RunStatus> {
        self.lock().finished.get(domain).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageAdapter for MemoryStorage {
    fn load(&mut self, domain: &str) -> StorageResult<Option<CrawlSnapshot>> {
        Ok(self.snapshot(domain))
    }

    fn save(&mut self, snapshot: &CrawlSnapshot) -> StorageResult<()> {
        let mut inner = self.lock();
        inner
            .snapshots
            .insert(snapshot.domain.clone(), snapshot.clone());
        inner.saves += 1;
        Ok(())
    }

    fn clear(&mut self, domain: &str) -> StorageResult<()> {
        self.lock().snapshots.remove(domain);
        Ok(())
    }

    fn finish(&mut self, domain: &str, status: RunStatus) -> StorageResult<()> {
        self.lock().finished.insert(domain.to_string(), status);
        Ok(())
    }
}
