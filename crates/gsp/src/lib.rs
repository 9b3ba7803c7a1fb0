// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

// Allow large error types - GspError carries page, line and source context
#![allow(clippy::result_large_err)]

//! # GSP
//!
//! Server page template compiler and rendering runtime backed by Lua.
//!
//! Pages mix static markup with embedded expressions, scriptlets and tags.
//! The compiler turns a page into a Lua chunk exposing a single render
//! function; the runtime renders it against a binding, dispatching library
//! tags through a shared output stack.
//!
//! ## Features
//!
//! - `${expr}`, `<%= expr %>`, `<% code %>` and `<%! declarations %>`
//! - Built-in `g:each`, `g:if`, `g:elseif`, `g:else` and `g:while` tags
//! - Pluggable tag libraries with body capture and unknown-tag passthrough
//! - Expression codecs (HTML, URL, JavaScript, raw)
//! - Page cache with staleness checks and cached compile failures
//! - Precompiled pages for production
//! - Template line attribution for compile and render errors
//!
//! ## Quick Start
//!
//! ```rust
//! use gsp::{Binding, Engine, MemoryResourceResolver};
//!
//! let resolver = MemoryResourceResolver::new();
//! resolver.add_template("hello.gsp", "<p>Hello ${name}!</p>");
//!
//! let engine = Engine::with_memory_cache(resolver, 100)?;
//! let html = engine.render_uri("hello.gsp", &Binding::new().with("name", "World"))?;
//! assert_eq!(html, "<p>Hello World!</p>");
//! # Ok::<(), gsp::GspError>(())
//! ```

/// Compiled page caching.
pub mod cache;
/// Expression output codecs.
pub mod codec;
/// Lua source writer with line tracking.
pub mod codegen;
/// Flat and typed configuration.
pub mod config;
/// Tag dispatch from generated code.
pub mod dispatch;
/// Main template engine.
pub mod engine;
/// Error types and reporting.
pub mod error;
/// In-memory resource resolver for tests and embedding.
pub mod memory_resolver;
/// Output stack and proxy writer.
pub mod output;
/// Compiled pages and render bindings.
pub mod page;
/// Page parser and code generator.
pub mod parser;
/// Precompiled page artifacts.
pub mod precompiled;
/// Resource resolution (filesystem, memory).
pub mod resolver;
/// Lua-facing page runtime.
pub mod runtime;
/// Template scanner.
pub mod scanner;
/// Layout capture preprocessing.
pub mod sitemesh;
/// Generated-line to template-line mapping.
pub mod sourcemap;
/// Built-in structural tags.
pub mod syntax;
/// Tag library API.
pub mod taglib;

pub use cache::{Cache, MemoryCache, NoOpCache};
pub use codec::Codec;
pub use config::{Config, Environment, GspConfig, SourceEncoding};
pub use engine::{Engine, Template};
pub use error::{GspError, Result, SourceContext};
pub use memory_resolver::MemoryResourceResolver;
pub use output::{OutputBuffer, OutputContext, OutputStack, ProxyWriter, WriteTarget};
pub use page::{Binding, CompiledPage};
pub use parser::{parse, ParseOptions, ParsedPage};
pub use precompiled::PrecompiledStore;
pub use resolver::{PageResource, ResourceResolver};
#[cfg(feature = "filesystem")]
pub use resolver::FileSystemResolver;
pub use runtime::RawValue;
pub use sourcemap::LineNumberMatrix;
pub use taglib::{
    register_layout_capture, BodyArgs, Invokable, TagArity, TagAttributes, TagBody, TagCall,
    TagLibraryLookup, TagLibraryRegistry,
};

// Re-export mlua value
pub use mlua::Value;

#[cfg(test)]
mod tests;
