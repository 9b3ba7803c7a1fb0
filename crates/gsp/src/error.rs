// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the GSP compiler and runtime.
//!
//! This module defines [`GspError`], the main error enum, and helper types
//! for rich error reporting with source context.
//!
//! # Error Categories
//!
//! - **Scan errors**: malformed delimiters, aborts the compile
//! - **Parse errors**: unbalanced or misplaced tags, aborts the compile
//! - **Compilation errors**: Lua rejected the generated page source
//! - **Expression / tag / render errors**: raised while rendering, always
//!   attributed to a template page and line
//!
//! Every variant is `Clone` so a failed compile can be cached and re-raised
//! on each later request for the same page.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Source context for enhanced error messages.
///
/// Captures a snippet of template source around an error location.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// All lines from the source file.
    pub lines: Vec<String>,
    /// The line number where the error occurred (1-indexed).
    pub error_line: usize,
    /// First line number of the snippet (1-indexed).
    pub snippet_start: usize,
    /// Last line number of the snippet (1-indexed).
    pub snippet_end: usize,
}

impl SourceContext {
    /// Creates a source context from template text and an error line.
    ///
    /// Captures 2 lines before and after the error line.
    pub fn from_source(source: &str, line: usize) -> Self {
        let lines: Vec<String> = source.lines().map(|l| l.to_string()).collect();
        let snippet_start = line.saturating_sub(2).max(1);
        let snippet_end = (line + 2).min(lines.len());

        Self {
            lines,
            error_line: line,
            snippet_start,
            snippet_end,
        }
    }

    /// Formats the snippet with line numbers, marking the error line.
    ///
    /// ```text
    ///    3 | <ul>
    ///  > 4 |   <g:each in="${items}">
    ///    5 | </ul>
    /// ```
    pub fn format_snippet(&self) -> String {
        let mut result = String::new();

        for line_num in self.snippet_start..=self.snippet_end {
            let Some(line) = self.lines.get(line_num - 1) else {
                break;
            };
            let marker = if line_num == self.error_line { ">" } else { " " };
            result.push_str(&format!("{} {:3} | {}\n", marker, line_num, line));
        }

        result
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_snippet())
    }
}

/// Helper struct for displaying optional source context.
pub struct OptSourceContextDisplay<'a>(pub &'a Option<SourceContext>);

impl<'a> fmt::Display for OptSourceContextDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ctx) => write!(f, "\n{}", ctx),
            None => Ok(()),
        }
    }
}

/// Helper trait for formatting optional source context.
pub trait AsDisplay<'a> {
    /// Wraps self for Display formatting.
    fn as_display(&'a self) -> OptSourceContextDisplay<'a>;
}

impl<'a> AsDisplay<'a> for Option<SourceContext> {
    fn as_display(&'a self) -> OptSourceContextDisplay<'a> {
        OptSourceContextDisplay(self)
    }
}

/// The main error type for GSP operations.
#[derive(Error, Debug, Clone)]
pub enum GspError {
    /// The scanner met a malformed or unterminated delimiter.
    #[error("Scan error in [{page}] at line {line}: {message}")]
    ScanError {
        /// Page name.
        page: String,
        /// Line where the offending construct starts.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Tag nesting or placement is invalid.
    #[error("Parse error in [{page}] at line {line}: {message}{}", source_context.as_display())]
    ParseError {
        /// Page name.
        page: String,
        /// Template line the error is attributed to.
        line: usize,
        /// Description of the problem.
        message: String,
        /// Source snippet, when the template text was at hand.
        source_context: Option<SourceContext>,
    },

    /// Lua rejected the generated page source.
    #[error("Compilation error in [{page}] at line {line}: {message}")]
    CompilationError {
        /// Page name.
        page: String,
        /// Template line, translated through the line-number matrix.
        line: usize,
        /// Compiler message with generated lines translated.
        message: String,
    },

    /// An embedded expression failed while rendering.
    #[error("Error evaluating expression [{expression}] on line [{line}] of [{page}]: {message}")]
    ExpressionError {
        /// Page name.
        page: String,
        /// Template line of the expression.
        line: usize,
        /// The expression text as authored.
        expression: String,
        /// Underlying failure.
        message: String,
    },

    /// A tag invocation failed while rendering.
    #[error("Error in [{page}] at line {line}: {message}")]
    TagInvocationError {
        /// Page name of the outermost call site.
        page: String,
        /// Line of the outermost call site.
        line: usize,
        /// Description, including the failing tag.
        message: String,
        /// The root cause, when it was itself a GSP error.
        cause: Option<Arc<GspError>>,
    },

    /// Plain Lua code inside a page failed while rendering.
    #[error("Error rendering [{page}] at line {line}: {message}")]
    RenderError {
        /// Page name.
        page: String,
        /// Template line, translated through the line-number matrix.
        line: usize,
        /// Lua message with generated lines translated.
        message: String,
    },

    /// Lua runtime or API error not attributed to a page.
    #[error("Lua error: {0}")]
    LuaError(#[from] mlua::Error),

    /// File system failure.
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    /// Template could not be located.
    #[error("Resolution error: {0}")]
    ResolutionError(String),

    /// Page cache or precompiled store failure.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Output stack misuse.
    #[error("Output error: {0}")]
    OutputError(String),
}

impl From<std::io::Error> for GspError {
    fn from(err: std::io::Error) -> Self {
        GspError::IoError(Arc::new(err))
    }
}

impl GspError {
    /// Template line the error is attributed to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            GspError::ScanError { line, .. }
            | GspError::ParseError { line, .. }
            | GspError::CompilationError { line, .. }
            | GspError::ExpressionError { line, .. }
            | GspError::TagInvocationError { line, .. }
            | GspError::RenderError { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Page the error is attributed to, if any.
    pub fn page(&self) -> Option<&str> {
        match self {
            GspError::ScanError { page, .. }
            | GspError::ParseError { page, .. }
            | GspError::CompilationError { page, .. }
            | GspError::ExpressionError { page, .. }
            | GspError::TagInvocationError { page, .. }
            | GspError::RenderError { page, .. } => Some(page),
            _ => None,
        }
    }

    /// True for errors raised while compiling, as opposed to rendering.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            GspError::ScanError { .. } | GspError::ParseError { .. } | GspError::CompilationError { .. }
        )
    }

    /// Converts the error for propagation through Lua frames.
    pub(crate) fn into_lua(self) -> mlua::Error {
        match self {
            GspError::LuaError(inner) => inner,
            other => mlua::Error::external(other),
        }
    }
}

/// Result type alias for GSP operations.
pub type Result<T> = std::result::Result<T, GspError>;
