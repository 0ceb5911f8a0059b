//! LRU cache of open git repository handles.
//!
//! Each open `git2::Repository` holds a handful of file descriptors; the
//! cache bounds how many stay open at once under many concurrent projects.

use crate::error::Result;
use git2::Repository;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 8;

/// Thread-safe LRU cache for git repositories.
pub struct RepoCache {
    cache: Mutex<LruCache<PathBuf, Arc<Mutex<Repository>>>>,
}

impl RepoCache {
    /// Create cache with specified capacity.
    ///
    /// # Panics
    /// Panics if capacity is 0 (programmer error).
    #[allow(clippy::expect_used)]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).expect("cache capacity must be > 0");
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Get or open the repository at `path`, updating LRU order.
    ///
    /// The returned handle must be locked before use.
    pub async fn get(&self, path: &Path) -> Result<Arc<Mutex<Repository>>> {
        let canonical = path.canonicalize()?;

        let mut cache = self.cache.lock().await;
        if let Some(repo) = cache.get(&canonical) {
            debug!(path = %canonical.display(), "repo cache hit");
            return Ok(Arc::clone(repo));
        }

        debug!(path = %canonical.display(), "repo cache miss, opening");
        let repo = Arc::new(Mutex::new(Repository::open(&canonical)?));
        cache.put(canonical, Arc::clone(&repo));
        Ok(repo)
    }

    /// Current cache size.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Check if cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for RepoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn opens_and_caches_repo() {
        let dir = TempDir::new().expect("temp dir");
        Repository::init(dir.path()).expect("init repo");

        let cache = RepoCache::default();
        assert!(cache.is_empty().await);

        let first = cache.get(dir.path()).await.expect("open");
        let second = cache.get(dir.path()).await.expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = RepoCache::new(1);
        let a = TempDir::new().expect("temp dir");
        let b = TempDir::new().expect("temp dir");
        Repository::init(a.path()).expect("init a");
        Repository::init(b.path()).expect("init b");

        cache.get(a.path()).await.expect("open a");
        cache.get(b.path()).await.expect("open b evicts a");
        assert_eq!(cache.len().await, 1);
    }
}
