// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Compile command: prints the Lua generated for a page.

use crate::project::Project;
use gsp::ResourceResolver;

/// Generated Lua source of `page`.
pub fn generated_source(project: &Project, page: &str) -> anyhow::Result<String> {
    let engine = project.engine()?;
    let resource = engine.resolver().resolve(page)?;
    // Loading the page reports Lua rejections with template lines
    engine.compile_source(&resource.name, &resource.source)?;
    Ok(engine.generate_source(&resource.name, &resource.source)?)
}

/// Runs the compile command.
pub fn run(project: &Project, page: &str) -> anyhow::Result<()> {
    print!("{}", generated_source(project, page)?);
    Ok(())
}
