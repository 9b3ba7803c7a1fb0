// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Precompiled page artifacts.
//!
//! A precompiled page is a pair of files named after its generated class:
//! `<class>.lua` holds the generated source and `<class>.meta.json` the
//! metadata needed to render it without the parser. The metadata records a
//! SHA-256 digest of the source; an artifact whose source no longer matches
//! is ignored.

use crate::error::{GspError, Result};
use crate::parser::ParsedPage;
use crate::resolver::path_to_string;
use crate::sourcemap::LineNumberMatrix;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Hex-encoded SHA-256 digest of `text`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Metadata stored next to a precompiled page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecompiledMeta {
    /// Canonical page name.
    pub name: String,
    /// Generated class name.
    pub class_name: String,
    /// Declared content type.
    pub content_type: String,
    /// Deduplicated static text.
    pub static_fragments: Vec<String>,
    /// Generated line to template line mapping.
    pub line_numbers: LineNumberMatrix,
    /// Tag prefixes declared with `taglib`.
    #[serde(default)]
    pub tag_uris: BTreeMap<String, String>,
    /// Expression codec name.
    #[serde(default)]
    pub codec: Option<String>,
    /// Timestamp of the source the page was generated from.
    pub last_modified: u64,
    /// SHA-256 of the generated source.
    pub sha256: String,
}

/// A verified precompiled page.
#[derive(Debug, Clone)]
pub struct PrecompiledArtifact {
    /// Generated Lua source.
    pub source: String,
    /// Stored metadata.
    pub meta: PrecompiledMeta,
}

/// A directory of precompiled pages.
#[derive(Debug, Clone)]
pub struct PrecompiledStore {
    dir: PathBuf,
}

impl PrecompiledStore {
    /// Creates a store rooted at `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the generated source for `class_name`.
    pub fn source_path(&self, class_name: &str) -> PathBuf {
        self.dir.join(format!("{}.lua", class_name))
    }

    /// Path of the metadata for `class_name`.
    pub fn meta_path(&self, class_name: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", class_name))
    }

    /// Writes a parsed page, returning the path of its source file.
    pub fn write(&self, page: &ParsedPage, last_modified: u64) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let meta = PrecompiledMeta {
            name: page.name.clone(),
            class_name: page.class_name.clone(),
            content_type: page.content_type.clone(),
            static_fragments: page.static_fragments.clone(),
            line_numbers: page.line_numbers.clone(),
            tag_uris: page.tag_uris.clone(),
            codec: page.codec.clone(),
            last_modified,
            sha256: sha256_hex(&page.source),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| GspError::CacheError(format!("Failed to serialize page metadata: {}", e)))?;

        let source_path = self.source_path(&page.class_name);
        std::fs::write(&source_path, &page.source)?;
        std::fs::write(self.meta_path(&page.class_name), json)?;
        debug!("Precompiled {} to {}", page.name, path_to_string(&source_path));
        Ok(source_path)
    }

    /// Loads the artifact for `class_name`.
    ///
    /// Returns `None` when no artifact exists or its checksum does not match.
    pub fn load(&self, class_name: &str) -> Result<Option<PrecompiledArtifact>> {
        let source_path = self.source_path(class_name);
        let meta_path = self.meta_path(class_name);
        if !source_path.is_file() || !meta_path.is_file() {
            debug!("No precompiled artifact for {}", class_name);
            return Ok(None);
        }

        let source = std::fs::read_to_string(&source_path)?;
        let meta: PrecompiledMeta = serde_json::from_str(&std::fs::read_to_string(&meta_path)?)
            .map_err(|e| {
                GspError::CacheError(format!(
                    "Invalid precompiled metadata {}: {}",
                    path_to_string(&meta_path),
                    e
                ))
            })?;

        if sha256_hex(&source) != meta.sha256 {
            warn!(
                "Checksum mismatch for precompiled page {}, compiling from source",
                path_to_string(&source_path)
            );
            return Ok(None);
        }

        Ok(Some(PrecompiledArtifact { source, meta }))
    }
}
