// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! GSP template engine for compiling, caching and rendering pages.
//!
//! This module provides the core [`Engine`] type that handles the complete
//! page lifecycle: resolution, parsing, compilation, caching, and rendering.
//!
//! # Quick Start
//!
//! ```rust
//! use gsp::{Binding, Engine, MemoryResourceResolver};
//!
//! let resolver = MemoryResourceResolver::new();
//! resolver.add_template("hello.gsp", "Hello ${name}!");
//!
//! let engine = Engine::with_memory_cache(resolver, 100)?;
//! let html = engine.render_uri("hello.gsp", &Binding::new().with("name", "World"))?;
//! assert_eq!(html, "Hello World!");
//! # Ok::<(), gsp::GspError>(())
//! ```
//!
//! # Architecture
//!
//! The engine coordinates several subsystems:
//!
//! - **Resolver**: Locates page source and its timestamp by uri
//! - **Parser**: Compiles page source into a Lua chunk
//! - **Lua Runtime**: Loads the chunk and runs its render function
//! - **Cache**: Stores compiled pages, including failed ones
//! - **Precompiled store**: Serves pages generated ahead of time in production
//!
//! # Caching
//!
//! A cached page is reused while the source timestamp is not newer than the
//! timestamp the page was built from. Staleness is checked in development,
//! and in other environments only when `gsp.reload.enabled` is set. A page
//! whose compile failed is cached too, and its error is returned on every
//! lookup until the source changes.

use crate::cache::{Cache, MemoryCache, NoOpCache};
use crate::codec;
use crate::config::GspConfig;
use crate::dispatch::{self, RootCause};
use crate::error::{GspError, Result};
use crate::output::{lock, OutputBuffer, OutputContext, WriteTarget};
use crate::page::{class_name_for, Binding, CompiledPage};
use crate::parser::{self, ParseOptions, ParsedPage};
use crate::precompiled::{PrecompiledArtifact, PrecompiledStore};
use crate::resolver::{path_to_string, ResourceResolver};
use crate::runtime::{register_globals, PageRuntime};
use crate::sourcemap::LineNumberMatrix;
use crate::taglib::{register_layout_capture, TagLibraryLookup, TagLibraryRegistry};
use mlua::{Function, Lua, Table};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Main GSP template engine.
///
/// The engine is generic over the resource resolver type `R`, allowing
/// different template loading strategies (filesystem, memory, ...).
///
/// # Examples
///
/// ```rust
/// use gsp::{Engine, GspConfig, MemoryResourceResolver, TagLibraryRegistry};
/// use std::sync::Arc;
///
/// let resolver = MemoryResourceResolver::new();
/// resolver.add_template("list.gsp", r#"<g:each in="${{1,2,3}}">${it}</g:each>"#);
///
/// let engine = Engine::new(resolver, Arc::new(TagLibraryRegistry::new()), GspConfig::default())?;
/// let template = engine.template("list.gsp")?;
/// assert_eq!(template.render(&Default::default())?, "123");
/// # Ok::<(), gsp::GspError>(())
/// ```
pub struct Engine<R: ResourceResolver> {
    resolver: R,
    tags: Arc<dyn TagLibraryLookup>,
    config: GspConfig,
    cache: Box<dyn Cache>,
    precompiled: Option<PrecompiledStore>,
    lua: Lua,
}

impl<R: ResourceResolver> std::fmt::Debug for Engine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("precompiled", &self.precompiled)
            .finish()
    }
}

impl<R: ResourceResolver> Engine<R> {
    /// Creates an engine whose cache follows `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Lua runtime fails to initialize.
    pub fn new(resolver: R, tags: Arc<dyn TagLibraryLookup>, config: GspConfig) -> Result<Self> {
        let cache: Box<dyn Cache> = if config.cache_enabled {
            Box::new(MemoryCache::new(config.cache_capacity))
        } else {
            Box::new(NoOpCache::new())
        };
        Self::with_cache(resolver, tags, config, cache)
    }

    /// Creates an engine with an explicit cache implementation.
    pub fn with_cache(
        resolver: R,
        tags: Arc<dyn TagLibraryLookup>,
        config: GspConfig,
        cache: Box<dyn Cache>,
    ) -> Result<Self> {
        config.validate()?;
        let lua = Lua::new();
        let globals = lua.globals();

        // Security: page code must not reach the host
        Self::sandbox_lua(&lua, &globals)?;
        register_globals(&lua)?;

        let precompiled = match &config.precompiled_dir {
            // Artifacts carry no link to later template edits
            Some(dir) if !config.is_reload_enabled() => Some(PrecompiledStore::new(dir)),
            Some(dir) => {
                debug!(
                    "Ignoring precompiled directory {} in {} mode with reloading",
                    path_to_string(dir),
                    config.environment
                );
                None
            }
            None => None,
        };

        Ok(Self {
            resolver,
            tags,
            config,
            cache,
            precompiled,
            lua,
        })
    }

    /// Creates a development engine with an LRU cache of `cache_size` pages
    /// and the layout capture tags registered.
    pub fn with_memory_cache(resolver: R, cache_size: usize) -> Result<Self> {
        let mut tags = TagLibraryRegistry::new();
        register_layout_capture(&mut tags);
        let config = GspConfig {
            cache_capacity: cache_size,
            ..GspConfig::default()
        };
        let cache = Box::new(MemoryCache::new(cache_size));
        Self::with_cache(resolver, Arc::new(tags), config, cache)
    }

    /// Sandboxes the Lua environment by disabling dangerous functions and libraries.
    ///
    /// This removes access to:
    /// - `io` library (file I/O)
    /// - `debug` library (introspection)
    /// - `load`, `loadstring`, `loadfile`, `dofile` (dynamic code execution)
    /// - Most of `os` library (keeps only `os.date`, `os.time`, `os.clock`, `os.difftime`)
    fn sandbox_lua(lua: &Lua, globals: &Table) -> Result<()> {
        let os_table: Table = globals.get("os")?;
        let safe_os = lua.create_table()?;
        for name in ["date", "time", "clock", "difftime"] {
            safe_os.set(name, os_table.get::<Function>(name)?)?;
        }

        globals.set("io", mlua::Value::Nil)?;
        globals.set("debug", mlua::Value::Nil)?;
        globals.set("load", mlua::Value::Nil)?;
        globals.set("loadstring", mlua::Value::Nil)?;
        globals.set("loadfile", mlua::Value::Nil)?;
        globals.set("dofile", mlua::Value::Nil)?;
        globals.set("os", safe_os)?;

        Ok(())
    }

    /// Returns a reference to the resolver used by this engine.
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// The typed configuration.
    pub fn config(&self) -> &GspConfig {
        &self.config
    }

    /// The Lua state pages run in.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            development: self.config.is_development_mode(),
            sitemesh_preprocess: self.config.sitemesh_preprocess,
            default_codec: self.config.default_codec.clone(),
            ..ParseOptions::default()
        }
    }

    /// The compiled page for `uri`, building it when absent or stale.
    ///
    /// # Errors
    ///
    /// Returns the resolution error when the page cannot be found, and the
    /// compile error, cached or fresh, when it does not compile.
    pub fn page(&self, uri: &str) -> Result<Arc<CompiledPage>> {
        let name = self.resolver.canonical_name(uri)?;

        if let Some(page) = self.cache.get(&name)? {
            if !self.config.is_reload_enabled() {
                return Self::usable(page);
            }
            let modified = self.resolver.last_modified(&name)?;
            if modified <= page.last_modified() {
                return Self::usable(page);
            }
            debug!(
                "Page {} changed ({} > {}), recompiling",
                name,
                modified,
                page.last_modified()
            );
        }

        if let Some(page) = self.load_precompiled(&name)? {
            let page = Arc::new(page);
            self.cache.set(&name, page.clone())?;
            return Ok(page);
        }

        let resource = self.resolver.resolve(&name)?;
        let page = match self.build(&resource.name, &resource.source, resource.last_modified) {
            Ok(page) => page,
            Err(e) if e.is_compile_error() => {
                debug!("Caching failed compile of {}: {}", name, e);
                CompiledPage::failed(&resource.name, resource.last_modified, e)
            }
            Err(e) => return Err(e),
        };

        let page = Arc::new(page);
        self.cache.set(&name, page.clone())?;
        Self::usable(page)
    }

    fn usable(page: Arc<CompiledPage>) -> Result<Arc<CompiledPage>> {
        match page.compile_error() {
            Some(error) => Err(error.clone()),
            None => Ok(page),
        }
    }

    /// A renderable template for `uri`.
    pub fn template(&self, uri: &str) -> Result<Template<'_, R>> {
        Ok(Template {
            engine: self,
            page: self.page(uri)?,
        })
    }

    /// Compiles `source` as page `name` without consulting or filling the cache.
    pub fn compile_source(&self, name: &str, source: &str) -> Result<Arc<CompiledPage>> {
        self.build(name, source, 0).map(Arc::new)
    }

    /// Generated Lua source of `source` compiled as page `name`.
    pub fn generate_source(&self, name: &str, source: &str) -> Result<String> {
        Ok(parser::parse(name, source, self.parse_options())?.source)
    }

    fn build(&self, name: &str, source: &str, last_modified: u64) -> Result<CompiledPage> {
        debug!("Compiling page {}", name);
        let parsed = parser::parse(name, source, self.parse_options())?;
        self.keep_generated(&parsed);
        let render = self.load_render_function(
            &parsed.name,
            &parsed.class_name,
            &parsed.source,
            &parsed.line_numbers,
        )?;
        Ok(CompiledPage::compiled(parsed, render, last_modified))
    }

    /// Loads a generated chunk and runs it to obtain the render function.
    fn load_render_function(
        &self,
        name: &str,
        class_name: &str,
        source: &str,
        line_numbers: &LineNumberMatrix,
    ) -> Result<Function> {
        let compile_error = |err: mlua::Error| {
            let message = err.to_string();
            GspError::CompilationError {
                page: name.to_string(),
                line: line_numbers.first_error_line(class_name, &message).unwrap_or(0),
                message: line_numbers.translate_error(class_name, name, &message),
            }
        };

        let chunk = self
            .lua
            .load(source)
            .set_name(format!("@{}", class_name))
            .into_function()
            .map_err(compile_error)?;
        chunk.call::<Function>(()).map_err(compile_error)
    }

    fn keep_generated(&self, parsed: &ParsedPage) {
        let Some(dir) = &self.config.keep_generated_dir else {
            return;
        };
        if !dir.is_dir() {
            warn!(
                "Generated source directory {} is not a directory, not keeping {}",
                path_to_string(dir),
                parsed.name
            );
            return;
        }
        let path = dir.join(format!("{}.lua", parsed.class_name));
        if let Err(e) = std::fs::write(&path, &parsed.source) {
            warn!("Failed to keep generated source {}: {}", path_to_string(&path), e);
        }
    }

    fn load_precompiled(&self, name: &str) -> Result<Option<CompiledPage>> {
        let Some(store) = &self.precompiled else {
            return Ok(None);
        };
        let class_name = class_name_for(name);
        let Some(PrecompiledArtifact { source, meta }) = store.load(&class_name)? else {
            return Ok(None);
        };

        debug!("Loading precompiled page {} from {}", name, path_to_string(store.dir()));
        let render = self.load_render_function(name, &class_name, &source, &meta.line_numbers)?;
        Ok(Some(
            CompiledPage::precompiled(name, &class_name, render, meta.last_modified).with_metadata(
                meta.content_type,
                meta.static_fragments,
                meta.line_numbers,
                meta.tag_uris,
                meta.codec,
            ),
        ))
    }

    /// Compiles `uri` and writes it to `dir` as a precompiled artifact.
    ///
    /// The generated chunk is loaded once first so a page Lua rejects is
    /// reported here rather than at lookup time.
    pub fn precompile<P: AsRef<Path>>(&self, uri: &str, dir: P) -> Result<PathBuf> {
        let resource = self.resolver.resolve(uri)?;
        let parsed = parser::parse(&resource.name, &resource.source, self.parse_options())?;
        self.load_render_function(
            &parsed.name,
            &parsed.class_name,
            &parsed.source,
            &parsed.line_numbers,
        )?;
        PrecompiledStore::new(dir).write(&parsed, resource.last_modified)
    }

    /// Renders `page` to a string.
    pub fn render(&self, page: &Arc<CompiledPage>, binding: &Binding) -> Result<String> {
        let context = OutputContext::new();
        let buffer = OutputBuffer::new();
        let result = self.render_to(page, binding, &context, WriteTarget::Buffer(buffer.clone()));
        context.cleanup()?;
        result?;
        buffer.take()
    }

    /// Renders `page` into `target` within an existing output context.
    ///
    /// `target` is pushed on the context's output stack for the duration of
    /// the render and popped again whether or not rendering succeeds.
    pub fn render_to(
        &self,
        page: &Arc<CompiledPage>,
        binding: &Binding,
        context: &OutputContext,
        target: WriteTarget,
    ) -> Result<()> {
        let render = page.render_function()?;
        let stack = context.stack_or_create()?;
        let out = {
            let mut stack = lock(&stack)?;
            stack.push(target)?;
            stack.proxy()
        };

        let result = (|| {
            let codec = match page.codec() {
                Some(name) => Some(
                    codec::lookup(name)
                        .ok_or_else(|| GspError::ConfigError(format!("Unknown codec [{}]", name)))?,
                ),
                None => None,
            };
            let env = binding.to_lua_env(&self.lua)?;
            let runtime = PageRuntime::new(page.clone(), codec, self.tags.clone(), out, context.clone());
            render
                .call::<()>((runtime, env))
                .map_err(|e| Self::render_error(page, e))
        })();

        lock(&stack)?.pop()?;
        result
    }

    fn render_error(page: &CompiledPage, err: mlua::Error) -> GspError {
        match dispatch::root_cause(GspError::LuaError(err)) {
            RootCause::Gsp(error) => error,
            RootCause::Lua(message) => {
                let matrix = page.line_numbers();
                GspError::RenderError {
                    page: page.name().to_string(),
                    line: matrix.first_error_line(page.class_name(), &message).unwrap_or(0),
                    message: matrix.translate_error(page.class_name(), page.name(), &message),
                }
            }
        }
    }

    /// Looks up and renders `uri`.
    pub fn render_uri(&self, uri: &str, binding: &Binding) -> Result<String> {
        let page = self.page(uri)?;
        self.render(&page, binding)
    }

    /// The line-number matrix of `uri`.
    pub fn line_numbers(&self, uri: &str) -> Result<LineNumberMatrix> {
        Ok(self.page(uri)?.line_numbers().clone())
    }

    /// Template line of a generated line of `uri`.
    pub fn map_stack_line_number(&self, uri: &str, generated_line: usize) -> Result<Option<usize>> {
        Ok(self.page(uri)?.line_numbers().source_line(generated_line))
    }

    /// Checks if a page is cached.
    pub fn cache_contains(&self, uri: &str) -> bool {
        self.resolver
            .canonical_name(uri)
            .map(|name| self.cache.contains_key(&name))
            .unwrap_or(false)
    }

    /// Clears all compiled pages from the cache.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()
    }
}

/// A compiled page bound to the engine that renders it.
pub struct Template<'e, R: ResourceResolver> {
    engine: &'e Engine<R>,
    page: Arc<CompiledPage>,
}

impl<R: ResourceResolver> Template<'_, R> {
    /// The compiled page.
    pub fn page(&self) -> &Arc<CompiledPage> {
        &self.page
    }

    /// Declared content type.
    pub fn content_type(&self) -> &str {
        self.page.content_type()
    }

    /// Renders to a string.
    pub fn render(&self, binding: &Binding) -> Result<String> {
        self.engine.render(&self.page, binding)
    }

    /// Renders into `target` within `context`.
    pub fn render_to(&self, binding: &Binding, context: &OutputContext, target: WriteTarget) -> Result<()> {
        self.engine.render_to(&self.page, binding, context, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_resolver::MemoryResourceResolver;

    fn engine(resolver: &MemoryResourceResolver) -> Engine<MemoryResourceResolver> {
        Engine::with_memory_cache(resolver.clone(), 10).unwrap()
    }

    #[test]
    fn sandbox_removes_host_access() {
        let engine = engine(&MemoryResourceResolver::new());
        let globals = engine.lua().globals();
        assert!(globals.get::<mlua::Value>("io").unwrap().is_nil());
        assert!(globals.get::<mlua::Value>("dofile").unwrap().is_nil());
        let os: Table = globals.get("os").unwrap();
        assert!(os.get::<mlua::Value>("execute").unwrap().is_nil());
        assert!(os.get::<Function>("time").is_ok());
    }

    #[test]
    fn pages_are_cached_by_canonical_name() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("views/a.gsp", "A");
        let engine = engine(&resolver);

        let first = engine.page("/views/a.gsp").unwrap();
        let second = engine.page("views/a.gsp").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(engine.cache_contains("views/a.gsp"));

        engine.clear_cache().unwrap();
        assert!(!engine.cache_contains("views/a.gsp"));
    }

    #[test]
    fn lua_rejections_are_compilation_errors() {
        let engine = engine(&MemoryResourceResolver::new());
        let err = engine.compile_source("bad.gsp", "line one\n<% if then %>").unwrap_err();
        match err {
            GspError::CompilationError { page, line, message } => {
                assert_eq!(page, "bad.gsp");
                assert_eq!(line, 2);
                assert!(message.contains("bad.gsp:2:"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn render_errors_are_translated() {
        let engine = engine(&MemoryResourceResolver::new());
        let page = engine
            .compile_source("boom.gsp", "a\nb\n<% error('boom') %>")
            .unwrap();
        let err = engine.render(&page, &Binding::new()).unwrap_err();
        match err {
            GspError::RenderError { page, line, message } => {
                assert_eq!(page, "boom.gsp");
                assert_eq!(line, 3);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn keep_generated_writes_class_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GspConfig {
            keep_generated_dir: Some(dir.path().to_path_buf()),
            ..GspConfig::default()
        };
        let engine = Engine::new(
            MemoryResourceResolver::new(),
            Arc::new(TagLibraryRegistry::new()),
            config,
        )
        .unwrap();
        engine.compile_source("views/a.gsp", "Hi").unwrap();
        let kept = std::fs::read_to_string(dir.path().join("views_a_gsp.lua")).unwrap();
        assert!(kept.starts_with("-- Generated from views/a.gsp"));
    }

    #[test]
    fn map_stack_line_number_uses_matrix() {
        let resolver = MemoryResourceResolver::new();
        resolver.add_template("a.gsp", "x\n${1}");
        let engine = engine(&resolver);
        let matrix = engine.line_numbers("a.gsp").unwrap();
        let generated = matrix.as_slice().iter().position(|&l| l == 2).unwrap() + 1;
        assert_eq!(engine.map_stack_line_number("a.gsp", generated).unwrap(), Some(2));
    }
}
