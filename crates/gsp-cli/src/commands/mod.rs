// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! CLI command implementations.
//!
//! - `render`: Render a page against a JSON binding
//! - `compile`: Print the Lua generated for a page
//! - `precompile`: Write precompiled artifacts for every page under the root

/// Generated source command.
pub mod compile;
/// Precompile command.
pub mod precompile;
/// Render command.
pub mod render;
