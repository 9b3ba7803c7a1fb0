// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Generated-line to template-line mapping.
//!
//! Every line of generated Lua source records the template line it was
//! produced from. Index `i` of the matrix holds the template line for
//! generated line `i + 1`; `0` marks lines with no template origin (the
//! chunk prologue, for example).

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Maps generated Lua lines back to template lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineNumberMatrix {
    lines: Vec<usize>,
}

impl LineNumberMatrix {
    /// Wraps a raw matrix.
    pub fn from_lines(lines: Vec<usize>) -> Self {
        Self { lines }
    }

    /// The raw matrix.
    pub fn as_slice(&self) -> &[usize] {
        &self.lines
    }

    /// Number of generated lines covered.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True if no lines are recorded.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Template line for a 1-based generated line.
    ///
    /// Unmapped lines fall back to the closest preceding mapped line.
    pub fn source_line(&self, generated_line: usize) -> Option<usize> {
        if generated_line == 0 {
            return None;
        }
        let end = generated_line.min(self.lines.len());
        self.lines[..end].iter().rev().copied().find(|&line| line > 0)
    }

    /// Rewrites `chunk:N:` locations in a Lua message to `page:L:`.
    pub fn translate_error(&self, chunk_name: &str, page: &str, message: &str) -> String {
        let Ok(re) = regex::Regex::new(&format!(r"{}:(\d+):", regex::escape(chunk_name))) else {
            return message.to_string();
        };

        let result: Cow<str> = re.replace_all(message, |caps: &regex::Captures| {
            match caps[1].parse::<usize>().ok().and_then(|l| self.source_line(l)) {
                Some(line) => format!("{}:{}:", page, line),
                None => format!("{}:", page),
            }
        });

        result.into_owned()
    }

    /// Template line of the first `chunk:N:` location in a Lua message.
    pub fn first_error_line(&self, chunk_name: &str, message: &str) -> Option<usize> {
        let re = regex::Regex::new(&format!(r"{}:(\d+):", regex::escape(chunk_name))).ok()?;
        let caps = re.captures(message)?;
        caps[1].parse::<usize>().ok().and_then(|l| self.source_line(l))
    }
}
