// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Lua source emission helpers.
//!
//! [`GspWriter`] accumulates generated page source one line at a time and
//! records, for each generated line, the template line it came from.

use crate::sourcemap::LineNumberMatrix;

/// Line-oriented Lua source writer with template line tracking.
#[derive(Debug, Default)]
pub struct GspWriter {
    buf: String,
    line_numbers: Vec<usize>,
    source_line: usize,
    indent_level: usize,
}

impl GspWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the template line attributed to subsequently written lines.
    pub fn set_source_line(&mut self, line: usize) {
        self.source_line = line;
    }

    /// Current template line.
    pub fn source_line(&self) -> usize {
        self.source_line
    }

    /// Increases indentation.
    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    /// Decreases indentation.
    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// 1-based number of the next generated line.
    pub fn current_line(&self) -> usize {
        self.line_numbers.len() + 1
    }

    /// Writes one line at the current indentation. Embedded newlines, from
    /// multi-line expressions, map to the same template line.
    pub fn println(&mut self, line: &str) {
        if !line.is_empty() {
            for _ in 0..self.indent_level {
                self.buf.push_str("  ");
            }
            self.buf.push_str(line);
        }
        self.buf.push('\n');
        for _ in 0..=line.matches('\n').count() {
            self.line_numbers.push(self.source_line);
        }
    }

    /// Writes user code verbatim, one generated line per template line,
    /// starting at template line `start_line`.
    pub fn print_code(&mut self, code: &str, start_line: usize) {
        for (offset, line) in code.split('\n').enumerate() {
            self.buf.push_str(line.trim_end_matches('\r'));
            self.buf.push('\n');
            self.line_numbers.push(start_line + offset);
        }
        self.source_line = start_line + code.matches('\n').count();
    }

    /// Consumes the writer, returning the source and its line matrix.
    pub fn finish(self) -> (String, LineNumberMatrix) {
        (self.buf, LineNumberMatrix::from_lines(self.line_numbers))
    }
}

/// Quotes `s` as a Lua string literal.
pub fn lua_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => out.push_str(&format!("\\{:03}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// True if `name` can be used as a Lua identifier.
pub fn is_valid_lua_identifier(name: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
        "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
    ];
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !KEYWORDS.contains(&name)
}
