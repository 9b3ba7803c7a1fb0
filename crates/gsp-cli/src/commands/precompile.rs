// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Precompile command: writes a precompiled artifact for every `.gsp` page
//! under the template root.

use crate::project::Project;
use gsp::resolver::path_to_string;
use gsp::Environment;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Outcome of a precompile run.
#[derive(Debug, Default)]
pub struct PrecompileReport {
    /// Artifacts written, as generated source paths.
    pub written: Vec<PathBuf>,
    /// Pages that failed, with their error.
    pub failed: Vec<(String, String)>,
}

/// Page uris of every `.gsp` file under `root`, sorted.
pub fn discover_pages(root: &Path) -> anyhow::Result<Vec<String>> {
    let pattern = format!("{}/**/*.gsp", glob::Pattern::escape(&path_to_string(root)));
    let mut pages = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        let relative = path.strip_prefix(root).unwrap_or(path.as_path());
        pages.push(path_to_string(relative));
    }
    pages.sort();
    Ok(pages)
}

/// Precompiles every page under the project root into `output`.
///
/// Pages are compiled in production mode. A failing page is recorded in the
/// report and does not stop the others.
pub fn precompile_all(project: &Project, output: &Path) -> anyhow::Result<PrecompileReport> {
    let config = project.config()?.with_environment(Environment::Production);
    let engine = project.engine_with(config)?;
    fs::create_dir_all(output)?;

    let mut report = PrecompileReport::default();
    for page in discover_pages(&project.root)? {
        match engine.precompile(&page, output) {
            Ok(path) => {
                tracing::info!("Precompiled {} -> {}", page, path.display());
                report.written.push(path);
            }
            Err(e) => {
                tracing::error!("Failed to precompile {}: {}", page, e);
                report.failed.push((page, e.to_string()));
            }
        }
    }
    Ok(report)
}

/// Runs the precompile command.
pub fn run(project: &Project, output: &Path) -> anyhow::Result<()> {
    let start = Instant::now();
    println!("Precompiling pages from: {}", project.root.display());

    let report = precompile_all(project, output)?;
    for (page, error) in &report.failed {
        eprintln!("  error: {}: {}", page, error);
    }
    println!(
        "Wrote {} page(s) to {} in {:.2?}",
        report.written.len(),
        output.display(),
        start.elapsed()
    );

    if !report.failed.is_empty() {
        anyhow::bail!("{} page(s) failed to precompile", report.failed.len());
    }
    Ok(())
}
