// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! In-memory template resolver.
//!
//! Useful for tests and for embedding templates in a binary. Every call to
//! [`MemoryResourceResolver::add_template`] stamps the page with a fresh,
//! strictly increasing timestamp, so replacing a template is seen as a
//! modification by the engine.

use crate::error::{GspError, Result};
use crate::resolver::{canonical_uri, PageResource, ResourceResolver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct StoredTemplate {
    source: String,
    last_modified: u64,
}

/// A resolver serving templates from a shared map.
///
/// Clones share the same storage.
///
/// # Examples
///
/// ```rust
/// use gsp::memory_resolver::MemoryResourceResolver;
/// use gsp::resolver::ResourceResolver;
///
/// let resolver = MemoryResourceResolver::new();
/// resolver.add_template("views/hello.gsp", "Hello ${name}!");
/// assert_eq!(resolver.resolve("/views/hello.gsp")?.source, "Hello ${name}!");
/// # Ok::<(), gsp::GspError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceResolver {
    templates: Arc<Mutex<HashMap<String, StoredTemplate>>>,
    clock: Arc<AtomicU64>,
}

impl MemoryResourceResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    fn templates(&self) -> MutexGuard<'_, HashMap<String, StoredTemplate>> {
        self.templates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(path: &str) -> String {
        canonical_uri(path).unwrap_or_else(|_| path.to_string())
    }

    /// Adds or replaces a template, bumping its timestamp.
    pub fn add_template(&self, path: &str, source: impl Into<String>) {
        let last_modified = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_template(path, source, last_modified);
    }

    /// Adds or replaces a template with an explicit timestamp.
    pub fn set_template(&self, path: &str, source: impl Into<String>, last_modified: u64) {
        self.clock.fetch_max(last_modified, Ordering::SeqCst);
        self.templates().insert(
            Self::key(path),
            StoredTemplate {
                source: source.into(),
                last_modified,
            },
        );
    }

    /// Removes a template.
    pub fn remove_template(&self, path: &str) -> bool {
        self.templates().remove(&Self::key(path)).is_some()
    }

    /// Removes all templates.
    pub fn clear(&self) {
        self.templates().clear();
    }

    /// Names of all stored templates, sorted.
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates().keys().cloned().collect();
        names.sort();
        names
    }

    fn stored(&self, uri: &str) -> Result<(String, StoredTemplate)> {
        let name = canonical_uri(uri)?;
        let stored = self
            .templates()
            .get(&name)
            .cloned()
            .ok_or_else(|| GspError::ResolutionError(format!("Template not found: {}", name)))?;
        Ok((name, stored))
    }
}

impl ResourceResolver for MemoryResourceResolver {
    fn resolve(&self, uri: &str) -> Result<PageResource> {
        let (name, stored) = self.stored(uri)?;
        Ok(PageResource {
            name,
            source: stored.source,
            last_modified: stored.last_modified,
        })
    }

    fn last_modified(&self, uri: &str) -> Result<u64> {
        Ok(self.stored(uri)?.1.last_modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_a_template_bumps_its_timestamp() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "one");
        let first = resolver.last_modified("a.gsp").unwrap();
        resolver.add_template("/a.gsp", "two");
        let page = resolver.resolve("a.gsp").unwrap();
        assert!(page.last_modified > first);
        assert_eq!(page.source, "two");
    }

    #[test]
    fn explicit_timestamps_advance_the_clock() {
        let resolver = MemoryResourceResolver::new();
        resolver.set_template("a.gsp", "one", 100);
        resolver.add_template("b.gsp", "two");
        assert_eq!(resolver.last_modified("b.gsp").unwrap(), 101);
    }

    #[test]
    fn remove_and_clear() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "a");
        resolver.add_template("b.gsp", "b");
        assert_eq!(resolver.template_names(), vec!["a.gsp", "b.gsp"]);
        assert!(resolver.remove_template("a.gsp"));
        assert!(matches!(
            resolver.resolve("a.gsp"),
            Err(GspError::ResolutionError(_))
        ));
        resolver.clear();
        assert!(resolver.template_names().is_empty());
    }
}
