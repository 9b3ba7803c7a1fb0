// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Compiled page caching.
//!
//! Pages are cached by canonical name. Entries are immutable; a stale
//! page is replaced wholesale by [`Cache::set`], and concurrent rebuilds of
//! the same page simply let the last writer win.
//!
//! # Cache Implementations
//!
//! - [`MemoryCache`]: In-memory LRU cache
//! - [`NoOpCache`]: Never stores anything; every lookup recompiles
//!
//! Implement the [`Cache`] trait for custom strategies.

use crate::error::{GspError, Result};
use crate::page::CompiledPage;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Trait for compiled page caches.
pub trait Cache: Send + Sync + std::fmt::Debug {
    /// Retrieves a page.
    fn get(&self, key: &str) -> Result<Option<Arc<CompiledPage>>>;
    /// Stores a page, replacing any previous entry.
    fn set(&self, key: &str, page: Arc<CompiledPage>) -> Result<()>;
    /// Removes a page.
    fn remove(&self, key: &str) -> Result<()>;
    /// Clears all cached pages.
    fn clear(&self) -> Result<()>;
    /// Checks if a key exists in the cache.
    fn contains_key(&self, key: &str) -> bool;
}

/// In-memory LRU (Least Recently Used) cache.
///
/// # Examples
///
/// ```rust
/// use gsp::cache::{Cache, MemoryCache};
///
/// let cache = MemoryCache::new(100);
/// assert!(!cache.contains_key("views/index.gsp"));
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCache {
    cache: Arc<Mutex<LruCache<String, Arc<CompiledPage>>>>,
}

impl MemoryCache {
    /// Creates a cache holding at most `capacity` pages (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, Arc<CompiledPage>>>> {
        self.cache
            .lock()
            .map_err(|_| GspError::CacheError("Failed to acquire cache lock".to_string()))
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Arc<CompiledPage>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, page: Arc<CompiledPage>) -> Result<()> {
        self.lock()?.put(key.to_string(), page);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn contains_key(&self, key: &str) -> bool {
        self.lock().map(|cache| cache.contains(key)).unwrap_or(false)
    }
}

/// No-op cache that never stores or retrieves anything.
#[derive(Debug, Clone, Default)]
pub struct NoOpCache;

impl NoOpCache {
    /// Creates a new no-op cache.
    pub fn new() -> Self {
        Self
    }
}

impl Cache for NoOpCache {
    fn get(&self, _key: &str) -> Result<Option<Arc<CompiledPage>>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _page: Arc<CompiledPage>) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn contains_key(&self, _key: &str) -> bool {
        false
    }
}
