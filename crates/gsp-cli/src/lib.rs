// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! GSP CLI library.
//!
//! This crate provides the command-line interface for the GSP template
//! engine: rendering a page against a JSON binding, printing the Lua
//! generated for a page, and precompiling a directory of pages for
//! production.
//!
//! # Usage
//!
//! This crate is primarily used through the `gsp` binary:
//!
//! ```bash
//! gsp render views/index.gsp --binding data.json
//! gsp compile views/index.gsp
//! gsp precompile --output build/gsp
//! ```
//!
//! # Configuration
//!
//! Engine settings are read from `gsp.toml` at the template root, or from
//! the file given with `--config`.

/// CLI commands (render, compile, precompile).
pub mod commands;
/// Template root and engine setup shared by all commands.
pub mod project;
