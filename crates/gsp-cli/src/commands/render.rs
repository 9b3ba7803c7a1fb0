// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Render command: renders one page against a JSON binding.

use crate::project::Project;
use anyhow::Context;
use gsp::Binding;
use std::fs;
use std::path::Path;

/// Reads a binding from a JSON file holding an object.
pub fn load_binding(path: &Path) -> anyhow::Result<Binding> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Binding::from_json(value)?)
}

/// Renders `page` and returns the output.
pub fn render_page(project: &Project, page: &str, binding: Option<&Path>) -> anyhow::Result<String> {
    let binding = match binding {
        Some(path) => load_binding(path)?,
        None => Binding::new(),
    };
    let engine = project.engine()?;
    let template = engine.template(page)?;
    tracing::debug!("Rendering {} as {}", page, template.content_type());
    Ok(template.render(&binding)?)
}

/// Runs the render command, writing to `output` or stdout.
pub fn run(project: &Project, page: &str, binding: Option<&Path>, output: Option<&Path>) -> anyhow::Result<()> {
    let html = render_page(project, page, binding)?;
    match output {
        Some(path) => fs::write(path, html).with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", html),
    }
    Ok(())
}
