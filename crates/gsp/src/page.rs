// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Compiled pages and render bindings.

use crate::error::{GspError, Result};
use crate::parser::{ParsedPage, DEFAULT_CONTENT_TYPE};
use crate::sourcemap::LineNumberMatrix;
use mlua::{Function, Lua, LuaSerdeExt, SerializeOptions, Table};
use std::collections::BTreeMap;
use std::fmt;

/// Generated chunk name for a canonical page name.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, and a leading digit is
/// prefixed with `_`: `views/hello.gsp` becomes `views_hello_gsp`.
pub fn class_name_for(page_name: &str) -> String {
    let mut name: String = page_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// An immutable compiled page.
///
/// A page whose compile failed is still a `CompiledPage`; it carries the
/// error so the cache can serve it without re-parsing.
#[derive(Clone)]
pub struct CompiledPage {
    name: String,
    class_name: String,
    content_type: String,
    line_numbers: LineNumberMatrix,
    static_fragments: Vec<String>,
    tag_uris: BTreeMap<String, String>,
    codec: Option<String>,
    last_modified: u64,
    generated_source: Option<String>,
    render: Option<Function>,
    compile_error: Option<GspError>,
}

impl CompiledPage {
    pub(crate) fn compiled(parsed: ParsedPage, render: Function, last_modified: u64) -> Self {
        Self {
            name: parsed.name,
            class_name: parsed.class_name,
            content_type: parsed.content_type,
            line_numbers: parsed.line_numbers,
            static_fragments: parsed.static_fragments,
            tag_uris: parsed.tag_uris,
            codec: parsed.codec,
            last_modified,
            generated_source: Some(parsed.source),
            render: Some(render),
            compile_error: None,
        }
    }

    pub(crate) fn failed(name: &str, last_modified: u64, error: GspError) -> Self {
        Self {
            name: name.to_string(),
            class_name: class_name_for(name),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            line_numbers: LineNumberMatrix::default(),
            static_fragments: Vec::new(),
            tag_uris: BTreeMap::new(),
            codec: None,
            last_modified,
            generated_source: None,
            render: None,
            compile_error: Some(error),
        }
    }

    /// Canonical page name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generated chunk name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Declared content type.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Generated line to template line mapping.
    pub fn line_numbers(&self) -> &LineNumberMatrix {
        &self.line_numbers
    }

    /// Deduplicated static text.
    pub fn static_fragments(&self) -> &[String] {
        &self.static_fragments
    }

    /// Tag prefixes declared with `taglib`.
    pub fn tag_uris(&self) -> &BTreeMap<String, String> {
        &self.tag_uris
    }

    /// Expression codec name.
    pub fn codec(&self) -> Option<&str> {
        self.codec.as_deref()
    }

    /// Source timestamp the page was built from.
    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    /// Generated Lua source, when built from source in this process.
    pub fn generated_source(&self) -> Option<&str> {
        self.generated_source.as_deref()
    }

    /// The compile error of a failed page.
    pub fn compile_error(&self) -> Option<&GspError> {
        self.compile_error.as_ref()
    }

    /// True if the page compiled.
    pub fn is_compiled(&self) -> bool {
        self.compile_error.is_none()
    }

    /// The render entry point, or the cached compile error.
    pub(crate) fn render_function(&self) -> Result<&Function> {
        match (&self.render, &self.compile_error) {
            (_, Some(error)) => Err(error.clone()),
            (Some(render), None) => Ok(render),
            (None, None) => Err(GspError::CompilationError {
                page: self.name.clone(),
                line: 0,
                message: "Page has no render function".into(),
            }),
        }
    }

    pub(crate) fn with_metadata(
        mut self,
        content_type: String,
        static_fragments: Vec<String>,
        line_numbers: LineNumberMatrix,
        tag_uris: BTreeMap<String, String>,
        codec: Option<String>,
    ) -> Self {
        self.content_type = content_type;
        self.static_fragments = static_fragments;
        self.line_numbers = line_numbers;
        self.tag_uris = tag_uris;
        self.codec = codec;
        self
    }

    pub(crate) fn precompiled(name: &str, class_name: &str, render: Function, last_modified: u64) -> Self {
        Self {
            name: name.to_string(),
            class_name: class_name.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            line_numbers: LineNumberMatrix::default(),
            static_fragments: Vec::new(),
            tag_uris: BTreeMap::new(),
            codec: None,
            last_modified,
            generated_source: None,
            render: Some(render),
            compile_error: None,
        }
    }
}

impl fmt::Debug for CompiledPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPage")
            .field("name", &self.name)
            .field("class_name", &self.class_name)
            .field("content_type", &self.content_type)
            .field("static_fragments", &self.static_fragments.len())
            .field("last_modified", &self.last_modified)
            .field("compile_error", &self.compile_error)
            .finish()
    }
}

/// Ordered name/value pairs a page is rendered against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
    entries: Vec<(String, serde_json::Value)>,
}

impl Binding {
    /// Creates an empty binding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets `name`, keeping its original position when already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// The value of `name`.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds a binding from the members of a JSON object.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            serde_json::Value::Null => Ok(Self::new()),
            other => Err(GspError::ConfigError(format!(
                "Binding must be a JSON object, found {}",
                other
            ))),
        }
    }

    /// The `_ENV` table of one render, falling back to the Lua globals.
    pub(crate) fn to_lua_env(&self, lua: &Lua) -> mlua::Result<Table> {
        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        let env = lua.create_table_with_capacity(0, self.entries.len())?;
        for (name, value) in &self.entries {
            env.raw_set(name.as_str(), lua.to_value_with(value, options)?)?;
        }
        let meta = lua.create_table()?;
        meta.raw_set("__index", lua.globals())?;
        lua.globals()
            .get::<Function>("setmetatable")?
            .call::<Table>((env, meta))
    }
}

impl FromIterator<(String, serde_json::Value)> for Binding {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        let mut binding = Binding::new();
        for (name, value) in iter {
            binding.insert(name, value);
        }
        binding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn class_names() {
        assert_eq!(class_name_for("views/hello.gsp"), "views_hello_gsp");
        assert_eq!(class_name_for("1-page.gsp"), "_1_page_gsp");
        assert_eq!(class_name_for("a_b"), "a_b");
    }

    #[test]
    fn binding_keeps_insertion_order() {
        let mut binding = Binding::new().with("b", 1).with("a", "x");
        binding.insert("b", 2);
        let names: Vec<&str> = binding.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(binding.get("b"), Some(&json!(2)));
    }

    #[test]
    fn binding_from_json_object() {
        let binding = Binding::from_json(json!({"name": "World"})).unwrap();
        assert_eq!(binding.get("name"), Some(&json!("World")));
        assert!(Binding::from_json(json!([1])).is_err());
    }

    #[test]
    fn lua_env_falls_back_to_globals() {
        let lua = Lua::new();
        let env = Binding::new()
            .with("name", "World")
            .with("missing", serde_json::Value::Null)
            .to_lua_env(&lua)
            .unwrap();
        assert_eq!(env.get::<String>("name").unwrap(), "World");
        assert!(env.get::<mlua::Value>("missing").unwrap().is_nil());
        assert!(env.get::<Function>("tostring").is_ok());
    }
}
