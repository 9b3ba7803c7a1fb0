// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template root and engine setup.

use anyhow::Context;
use gsp::{
    register_layout_capture, Config, Engine, Environment, FileSystemResolver, GspConfig,
    TagLibraryRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the configuration file looked up at the template root.
pub const CONFIG_FILE: &str = "gsp.toml";

/// Where templates live and how the engine is configured.
#[derive(Debug, Clone)]
pub struct Project {
    /// Template root directory.
    pub root: PathBuf,
    /// Explicit configuration file.
    pub config_file: Option<PathBuf>,
    /// Environment override.
    pub environment: Option<Environment>,
}

impl Project {
    /// A project rooted at `root` with default configuration lookup.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config_file: None,
            environment: None,
        }
    }

    /// Reads the typed engine configuration.
    ///
    /// Uses `--config` when given, otherwise `gsp.toml` at the root when it
    /// exists, otherwise the defaults.
    pub fn config(&self) -> anyhow::Result<GspConfig> {
        let path = match &self.config_file {
            Some(path) => Some(path.clone()),
            None => Some(self.root.join(CONFIG_FILE)).filter(|p| p.is_file()),
        };

        let flat = match &path {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
            }
            None => Config::new(),
        };

        let mut config = GspConfig::from_config(&flat)?;
        if let Some(environment) = self.environment {
            config = config.with_environment(environment);
        }
        Ok(config)
    }

    /// An engine over the template root with the layout capture tags registered.
    pub fn engine(&self) -> anyhow::Result<Engine<FileSystemResolver>> {
        self.engine_with(self.config()?)
    }

    /// An engine over the template root using `config`.
    pub fn engine_with(&self, config: GspConfig) -> anyhow::Result<Engine<FileSystemResolver>> {
        if !self.root.is_dir() {
            anyhow::bail!("Template root {} is not a directory", self.root.display());
        }
        let resolver = FileSystemResolver::new(&self.root).with_encoding(config.encoding);
        let mut tags = TagLibraryRegistry::new();
        register_layout_capture(&mut tags);
        Ok(Engine::new(resolver, Arc::new(tags), config)?)
    }
}
