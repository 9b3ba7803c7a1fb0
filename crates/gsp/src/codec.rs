// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Output codecs.
//!
//! A page's expression codec encodes every `${...}` value before it is
//! written. Codecs are looked up by case-insensitive name with [`lookup`].

use std::sync::Arc;

/// An encode/decode pair applied to expression output.
pub trait Codec: Send + Sync {
    /// Canonical codec name.
    fn name(&self) -> &'static str;
    /// Encodes a value for output.
    fn encode(&self, input: &str) -> String;
    /// Reverses [`encode`](Self::encode).
    fn decode(&self, input: &str) -> String;
}

/// Escapes markup-significant characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlCodec;

impl Codec for HtmlCodec {
    fn name(&self) -> &'static str {
        "HTML"
    }

    fn encode(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                c => out.push(c),
            }
        }
        out
    }

    fn decode(&self, input: &str) -> String {
        input
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    }
}

/// Identity codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn name(&self) -> &'static str {
        "Raw"
    }

    fn encode(&self, input: &str) -> String {
        input.to_string()
    }

    fn decode(&self, input: &str) -> String {
        input.to_string()
    }
}

/// `application/x-www-form-urlencoded` encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlCodec;

impl Codec for UrlCodec {
    fn name(&self) -> &'static str {
        "URL"
    }

    fn encode(&self, input: &str) -> String {
        form_urlencoded::byte_serialize(input.as_bytes()).collect()
    }

    fn decode(&self, input: &str) -> String {
        form_urlencoded::parse(input.as_bytes())
            .map(|(key, value)| {
                if value.is_empty() {
                    key.into_owned()
                } else {
                    format!("{}={}", key, value)
                }
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Escapes text for embedding inside a JavaScript string literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaScriptCodec;

impl Codec for JavaScriptCodec {
    fn name(&self) -> &'static str {
        "JavaScript"
    }

    fn encode(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\'' => out.push_str("\\'"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '<' => out.push_str("\\u003c"),
                '>' => out.push_str("\\u003e"),
                '/' => out.push_str("\\/"),
                c => out.push(c),
            }
        }
        out
    }

    fn decode(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => out.push(decoded),
                        None => {
                            out.push_str("\\u");
                            out.push_str(&hex);
                        }
                    }
                }
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        out
    }
}

/// Finds a built-in codec by name. `None` and `Raw` resolve to the identity codec.
pub fn lookup(name: &str) -> Option<Arc<dyn Codec>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "html" => Some(Arc::new(HtmlCodec)),
        "raw" | "none" => Some(Arc::new(RawCodec)),
        "url" => Some(Arc::new(UrlCodec)),
        "javascript" | "js" => Some(Arc::new(JavaScriptCodec)),
        _ => None,
    }
}
