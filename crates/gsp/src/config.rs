// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Engine configuration.
//!
//! Configuration is a flat string-keyed view ([`Config`]). It can be built in
//! code or loaded from TOML, where nested tables become dotted keys:
//!
//! ```toml
//! [gsp]
//! environment = "production"
//! precompiled.dir = "build/gsp"
//!
//! [gsp.default]
//! codec = "html"
//! ```
//!
//! [`GspConfig`] is the typed view the engine consults.

use crate::codec;
use crate::error::{GspError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Codec applied to `${}` output when a page does not choose one.
pub const DEFAULT_CODEC: &str = "gsp.default.codec";
/// Character encoding of template sources.
pub const ENCODING: &str = "gsp.encoding";
/// Directory receiving a debug copy of generated page source.
pub const KEEPGENERATED_DIR: &str = "gsp.keepgenerated.dir";
/// Whether layout elements are rewritten into capture tags.
pub const SITEMESH_PREPROCESS: &str = "gsp.sitemesh.preprocess";
/// `development`, `test` or `production`.
pub const ENVIRONMENT: &str = "gsp.environment";
/// Forces staleness checks outside development.
pub const RELOAD_ENABLED: &str = "gsp.reload.enabled";
/// Directory holding precompiled pages.
pub const PRECOMPILED_DIR: &str = "gsp.precompiled.dir";
/// Whether compiled pages are cached.
pub const CACHE_ENABLED: &str = "gsp.cache.enabled";
/// Maximum number of cached pages.
pub const CACHE_CAPACITY: &str = "gsp.cache.capacity";

/// Flat string-keyed configuration view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Looks a value up.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Looks a boolean up. Accepts `true`/`false`, `yes`/`no`, `on`/`off`, `1`/`0`.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key).map(|v| parse_bool(key, v)).transpose()
    }

    /// All keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses TOML text, flattening nested tables into dotted keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| GspError::ConfigError(format!("Invalid TOML: {}", e)))?;
        let mut config = Config::new();
        flatten_table("", &table, &mut config)?;
        Ok(config)
    }

    /// Loads a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, config: &mut Config) -> Result<()> {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten_table(&full_key, inner, config)?,
            toml::Value::String(s) => config.set(&full_key, s.clone()),
            toml::Value::Integer(i) => config.set(&full_key, i.to_string()),
            toml::Value::Float(f) => config.set(&full_key, f.to_string()),
            toml::Value::Boolean(b) => config.set(&full_key, b.to_string()),
            toml::Value::Datetime(d) => config.set(&full_key, d.to_string()),
            toml::Value::Array(_) => {
                return Err(GspError::ConfigError(format!(
                    "Arrays are not supported for key [{}]",
                    full_key
                )))
            }
        }
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(GspError::ConfigError(format!(
            "Expected a boolean for [{}], got [{}]",
            key, other
        ))),
    }
}

/// Operating mode of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Expressions carry their text and line; pages reload when changed.
    #[default]
    Development,
    /// Like development, used by test suites.
    Test,
    /// No expression wrapping, no reloading, precompiled pages preferred.
    Production,
}

impl FromStr for Environment {
    type Err = GspError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(GspError::ConfigError(format!("Unknown environment [{}]", other))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        })
    }
}

/// Character encoding of template sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceEncoding {
    /// UTF-8, the default.
    #[default]
    Utf8,
    /// ISO-8859-1, one byte per character.
    Latin1,
}

impl SourceEncoding {
    /// Decodes template bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            SourceEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| GspError::ResolutionError(format!("Template is not valid UTF-8: {}", e))),
            SourceEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

impl FromStr for SourceEncoding {
    type Err = GspError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(SourceEncoding::Utf8),
            "ISO-8859-1" | "LATIN1" | "ISO8859-1" => Ok(SourceEncoding::Latin1),
            other => Err(GspError::ConfigError(format!("Unsupported template encoding [{}]", other))),
        }
    }
}

/// Typed configuration consulted by the engine.
#[derive(Debug, Clone)]
pub struct GspConfig {
    /// Codec for `${}` output when a page sets none.
    pub default_codec: Option<String>,
    /// Template source encoding.
    pub encoding: SourceEncoding,
    /// Where to keep a copy of generated source.
    pub keep_generated_dir: Option<PathBuf>,
    /// Rewrite layout elements into capture tags.
    pub sitemesh_preprocess: bool,
    /// Operating mode.
    pub environment: Environment,
    /// Check staleness even outside development.
    pub reload_enabled: bool,
    /// Precompiled page directory.
    pub precompiled_dir: Option<PathBuf>,
    /// Cache compiled pages.
    pub cache_enabled: bool,
    /// Cache capacity.
    pub cache_capacity: usize,
}

impl Default for GspConfig {
    fn default() -> Self {
        Self {
            default_codec: None,
            encoding: SourceEncoding::Utf8,
            keep_generated_dir: None,
            sitemesh_preprocess: false,
            environment: Environment::Development,
            reload_enabled: false,
            precompiled_dir: None,
            cache_enabled: true,
            cache_capacity: 1000,
        }
    }
}

impl GspConfig {
    /// Reads the typed view from flat configuration, defaulting absent keys.
    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = Self::default();
        let cache_capacity = match config.get(CACHE_CAPACITY) {
            Some(v) => v.trim().parse::<usize>().map_err(|_| {
                GspError::ConfigError(format!("Expected a number for [{}], got [{}]", CACHE_CAPACITY, v))
            })?,
            None => defaults.cache_capacity,
        };

        let typed = Self {
            default_codec: config
                .get(DEFAULT_CODEC)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            encoding: config.get(ENCODING).map(str::parse).transpose()?.unwrap_or_default(),
            keep_generated_dir: config.get(KEEPGENERATED_DIR).map(PathBuf::from),
            sitemesh_preprocess: config.get_bool(SITEMESH_PREPROCESS)?.unwrap_or(defaults.sitemesh_preprocess),
            environment: config.get(ENVIRONMENT).map(str::parse).transpose()?.unwrap_or_default(),
            reload_enabled: config.get_bool(RELOAD_ENABLED)?.unwrap_or(defaults.reload_enabled),
            precompiled_dir: config.get(PRECOMPILED_DIR).map(PathBuf::from),
            cache_enabled: config.get_bool(CACHE_ENABLED)?.unwrap_or(defaults.cache_enabled),
            cache_capacity: cache_capacity.max(1),
        };
        typed.validate()?;
        Ok(typed)
    }

    /// Checks values that can only be resolved against the runtime, such as
    /// the default codec name.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.default_codec {
            if codec::lookup(name).is_none() {
                return Err(GspError::ConfigError(format!(
                    "Unknown codec [{}] for [{}]",
                    name, DEFAULT_CODEC
                )));
            }
        }
        Ok(())
    }

    /// Builder-style environment override.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Expressions are wrapped with their text and line outside production.
    pub fn is_development_mode(&self) -> bool {
        self.environment != Environment::Production
    }

    /// Cached pages are checked for staleness on lookup.
    pub fn is_reload_enabled(&self) -> bool {
        self.is_development_mode() || self.reload_enabled
    }
}
