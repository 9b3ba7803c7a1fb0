// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use gsp::Environment;
use gsp_cli::commands;
use gsp_cli::project::Project;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gsp")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Server page compiler and renderer backed by Lua", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Template root directory
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Configuration file (defaults to gsp.toml in the template root)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Environment: development, test or production
    #[arg(short, long, global = true)]
    env: Option<Environment>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page to stdout or a file
    Render {
        /// Page path relative to the template root
        page: String,
        /// JSON file with the page binding
        #[arg(short, long)]
        binding: Option<PathBuf>,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the Lua generated for a page
    Compile {
        /// Page path relative to the template root
        page: String,
    },
    /// Precompile every page under the template root
    Precompile {
        /// Output directory
        #[arg(short, long, default_value = "gsp-precompiled")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with the specified log level
    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project = Project {
        root: cli.root,
        config_file: cli.config,
        environment: cli.env,
    };

    match cli.command {
        Commands::Render { page, binding, output } => {
            commands::render::run(&project, &page, binding.as_deref(), output.as_deref())
        }
        Commands::Compile { page } => commands::compile::run(&project, &page),
        Commands::Precompile { output } => commands::precompile::run(&project, &output),
    }
}
