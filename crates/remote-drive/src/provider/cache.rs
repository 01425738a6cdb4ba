//! Single-flight folder cache.
//!
//! Cache hits are lock-free reads from a `DashMap`. Misses serialize on one
//! async mutex per content source; the holder re-checks the map, fetches, and
//! installs the snapshot so concurrent callers for the same path observe a
//! single backend fetch.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::DriveError;
use crate::projection::{DirectorySnapshot, PlaceholderInfo};
use crate::util::CaseSensitivity;

/// Cached directory snapshots keyed by folded relative path.
pub struct FolderCache {
    entries: DashMap<String, Arc<DirectorySnapshot>>,
    fetch_lock: Mutex<()>,
    case: CaseSensitivity,
}

impl FolderCache {
    /// Create an empty cache.
    ///
    /// # Arguments
    /// * `case` - Policy for key folding and snapshot ordering
    pub fn new(case: CaseSensitivity) -> Self {
        Self {
            entries: DashMap::new(),
            fetch_lock: Mutex::new(()),
            case,
        }
    }

    /// Cache key for a relative path.
    pub fn key(&self, relative_path: &str) -> String {
        self.case.fold(&crate::util::path::normalize(relative_path))
    }

    /// Cached snapshot, without fetching.
    pub fn get(&self, relative_path: &str) -> Option<Arc<DirectorySnapshot>> {
        self.entries
            .get(&self.key(relative_path))
            .map(|entry| entry.value().clone())
    }

    /// Cached snapshot, fetching it on a miss.
    ///
    /// # Arguments
    /// * `relative_path` - Directory to resolve
    /// * `fetch` - Produces the listing; called at most once per miss
    ///
    /// # Returns
    /// `None` if the directory does not exist. Missing directories are not cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        relative_path: &str,
        fetch: F,
    ) -> Result<Option<Arc<DirectorySnapshot>>, DriveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Vec<PlaceholderInfo>>, DriveError>>,
    {
        let key: String = self.key(relative_path);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Some(entry.value().clone()));
        }

        let _guard: MutexGuard<'_, ()> = self.fetch_lock.lock().await;
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Some(entry.value().clone()));
        }

        let Some(items) = fetch().await? else {
            return Ok(None);
        };

        let snapshot = Arc::new(DirectorySnapshot::new(items, self.case));
        self.entries.insert(key, snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Acquire the fetch exclusion.
    pub async fn lock(&self) -> FolderCacheGuard<'_> {
        FolderCacheGuard {
            cache: self,
            _guard: self.fetch_lock.lock().await,
        }
    }

    /// Number of cached folders.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holds the fetch exclusion; no fetch can install a snapshot while it lives.
pub struct FolderCacheGuard<'a> {
    cache: &'a FolderCache,
    _guard: MutexGuard<'a, ()>,
}

impl FolderCacheGuard<'_> {
    /// Drop every cached snapshot.
    pub fn clear(&self) {
        self.cache.entries.clear();
    }

    /// Number of cached folders.
    pub fn len(&self) -> usize {
        self.cache.entries.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.entries.is_empty()
    }
}
