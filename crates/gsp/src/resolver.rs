// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template resource resolution.
//!
//! This module provides the [`ResourceResolver`] trait and implementations
//! for locating and loading template source by uri.
//!
//! # Resolver Implementations
//!
//! - [`FileSystemResolver`]: Loads templates from a root directory
//! - [`MemoryResourceResolver`](crate::memory_resolver::MemoryResourceResolver):
//!   Loads templates from in-memory storage
//!
//! Every resolved page carries a canonical name, used as the cache key and
//! for generated chunk names, and a last-modified timestamp the engine
//! compares against the build timestamp of a cached page.

use crate::error::{GspError, Result};
use std::path::Path;

#[cfg(feature = "filesystem")]
use crate::config::SourceEncoding;
#[cfg(feature = "filesystem")]
use std::path::PathBuf;
#[cfg(feature = "filesystem")]
use std::time::UNIX_EPOCH;

/// Converts a Path to a normalized string with forward slashes.
#[inline]
pub fn path_to_string<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// Canonical form of a page uri: forward slashes, no leading `/` or `./`,
/// and no empty or `.` segments.
pub fn canonical_uri(uri: &str) -> Result<String> {
    let uri = uri.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in uri.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(GspError::ResolutionError(format!(
                        "Page uri escapes the template root: {}",
                        uri
                    )));
                }
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(GspError::ResolutionError(format!("Empty page uri: [{}]", uri)));
    }
    Ok(segments.join("/"))
}

/// A loaded template.
#[derive(Debug, Clone)]
pub struct PageResource {
    /// Canonical page name.
    pub name: String,
    /// Template source text.
    pub source: String,
    /// Last-modified timestamp, in milliseconds.
    pub last_modified: u64,
}

/// Trait for resolving and loading template resources.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait ResourceResolver: Send + Sync + 'static {
    /// Loads the page at `uri`.
    fn resolve(&self, uri: &str) -> Result<PageResource>;

    /// The last-modified timestamp of `uri` without loading its source.
    fn last_modified(&self, uri: &str) -> Result<u64>;

    /// The canonical name `uri` resolves to.
    fn canonical_name(&self, uri: &str) -> Result<String> {
        canonical_uri(uri)
    }
}

/// Filesystem-based resource resolver.
///
/// Loads templates relative to a root directory. Only available with the
/// `filesystem` feature.
///
/// # Examples
///
/// ```rust,no_run
/// use gsp::resolver::{FileSystemResolver, ResourceResolver};
///
/// let resolver = FileSystemResolver::new("./views");
/// let page = resolver.resolve("index.gsp")?;
/// # Ok::<(), gsp::GspError>(())
/// ```
#[cfg(feature = "filesystem")]
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    /// The root directory for template resolution.
    pub root_dir: PathBuf,
    /// Character encoding of template files.
    pub encoding: SourceEncoding,
}

#[cfg(feature = "filesystem")]
impl FileSystemResolver {
    /// Creates a new filesystem resolver with the given root directory.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            encoding: SourceEncoding::default(),
        }
    }

    /// Sets the template file encoding.
    pub fn with_encoding(mut self, encoding: SourceEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn path_for(&self, uri: &str) -> Result<(String, PathBuf)> {
        let name = canonical_uri(uri)?;
        let path = self.root_dir.join(&name);
        if !path.is_file() {
            return Err(GspError::ResolutionError(format!(
                "Template not found: {} (looked in {})",
                name,
                path_to_string(&self.root_dir)
            )));
        }
        Ok((name, path))
    }
}

#[cfg(feature = "filesystem")]
impl ResourceResolver for FileSystemResolver {
    fn resolve(&self, uri: &str) -> Result<PageResource> {
        let (name, path) = self.path_for(uri)?;
        let bytes = std::fs::read(&path)?;
        let source = self.encoding.decode(&bytes)?;
        let last_modified = modified_millis(&path)?;
        Ok(PageResource {
            name,
            source,
            last_modified,
        })
    }

    fn last_modified(&self, uri: &str) -> Result<u64> {
        let (_, path) = self.path_for(uri)?;
        modified_millis(&path)
    }
}

#[cfg(feature = "filesystem")]
fn modified_millis(path: &Path) -> Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Ok(u64::try_from(millis).unwrap_or(u64::MAX))
}
