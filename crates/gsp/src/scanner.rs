// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template tokenizer.
//!
//! The [`Scanner`] walks template text and produces [`Token`]s lazily. It
//! recognises every literal delimiter before falling back to static text:
//!
//! | Syntax                     | Token                                   |
//! |----------------------------|-----------------------------------------|
//! | `${ expr }`                | [`TokenKind::Expression`]               |
//! | `<%= expr %>`              | [`TokenKind::ScriptletExpression`]      |
//! | `<% code %>`, `%{ code }%` | [`TokenKind::Scriptlet`]                |
//! | `<%! code %>`, `!{ code }!`| [`TokenKind::Declaration`]              |
//! | `<%@ dir %>`, `@{ dir }`   | [`TokenKind::Directive`]                |
//! | `<ns:name a="b">`          | [`TokenKind::TagOpen`]                  |
//! | `</ns:name>`               | [`TokenKind::TagClose`]                 |
//!
//! `<%-- --%>` and `%{-- --}%` comments produce no token at all.
//!
//! Scanning is deterministic: after [`Scanner::reset`] the exact same token
//! sequence is produced again, which the two-pass parser relies on.

use crate::error::{GspError, Result};

/// Default upper bound for a single static text token, in bytes.
pub const DEFAULT_MAX_HTML_LENGTH: usize = 64_000;

/// The kind of a scanned token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Static text.
    Html,
    /// `${ ... }` expression, written through the page codec.
    Expression,
    /// `<%= ... %>` expression, written raw.
    ScriptletExpression,
    /// `<% ... %>` or `%{ ... }%` code.
    Scriptlet,
    /// `<%! ... %>` or `!{ ... }!` chunk-level code.
    Declaration,
    /// `<%@ ... %>` or `@{ ... }` directive.
    Directive,
    /// Start of a namespaced tag; `text` holds the tag name and attributes.
    TagOpen {
        /// Tag namespace (the part before the colon).
        namespace: String,
        /// True for self-closing `<ns:name/>` tags.
        empty: bool,
    },
    /// End of a namespaced tag; `text` holds the tag name.
    TagClose {
        /// Tag namespace.
        namespace: String,
    },
    /// End of input.
    Eof,
}

/// A token with its text and the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// What was scanned.
    pub kind: TokenKind,
    /// Token payload without delimiters.
    pub text: String,
    /// Source line of the first character of the token.
    pub line: usize,
}

enum Markup {
    Comment(&'static str),
    Token(TokenMarkup),
}

enum TokenMarkup {
    Delimited {
        kind: TokenKind,
        open: usize,
        close: &'static [&'static str],
        what: &'static str,
        decode_entities: bool,
    },
    Expression,
    BraceDirective,
    StartTag(String),
    EndTag(String),
}

/// Lazy, restartable tokenizer over one template.
#[derive(Debug, Clone)]
pub struct Scanner {
    page: String,
    text: String,
    pos: usize,
    line_starts: Vec<usize>,
    max_html_length: usize,
}

impl Scanner {
    /// Creates a scanner over `text`; `page` names the template in errors.
    pub fn new(page: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            page: page.into(),
            text,
            pos: 0,
            line_starts,
            max_html_length: DEFAULT_MAX_HTML_LENGTH,
        }
    }

    /// Overrides the maximum static text token length.
    pub fn with_max_html_length(mut self, max: usize) -> Self {
        self.max_html_length = max.max(1);
        self
    }

    /// Rewinds to position zero.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// The template text being scanned.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The page name used in error messages.
    pub fn page(&self) -> &str {
        &self.page
    }

    /// 1-based line number of a byte offset.
    pub fn line_at(&self, pos: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= pos)
    }

    /// Produces the next token. After [`TokenKind::Eof`] it keeps returning `Eof`.
    pub fn next_token(&mut self) -> Result<Token> {
        loop {
            if self.pos >= self.text.len() {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    line: self.line_at(self.text.len()),
                });
            }

            match self.markup_at(self.pos) {
                Some(Markup::Comment(close)) => self.skip_comment(close)?,
                Some(Markup::Token(markup)) => return self.scan_markup(markup),
                None => return Ok(self.scan_html()),
            }
        }
    }

    /// Scans the remaining input into a vector, ending with the `Eof` token.
    pub fn tokens(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> GspError {
        GspError::ScanError {
            page: self.page.clone(),
            line: self.line_at(pos),
            message: message.into(),
        }
    }

    fn markup_at(&self, pos: usize) -> Option<Markup> {
        let rest = &self.text[pos..];
        let first = *rest.as_bytes().first()?;
        match first {
            b'<' => {
                if rest.starts_with("<%--") {
                    Some(Markup::Comment("--%>"))
                } else if rest.starts_with("<%=") {
                    Some(delimited(TokenKind::ScriptletExpression, 3, &["%>"], "scriptlet expression", false))
                } else if rest.starts_with("<%@") {
                    Some(delimited(TokenKind::Directive, 3, &["%>"], "directive", false))
                } else if rest.starts_with("<%!") {
                    Some(delimited(TokenKind::Declaration, 3, &["%>"], "declaration", false))
                } else if rest.starts_with("<%") {
                    Some(delimited(TokenKind::Scriptlet, 2, &["%>"], "scriptlet", false))
                } else if let Some(after) = rest.strip_prefix("</") {
                    tag_namespace(after).map(|ns| Markup::Token(TokenMarkup::EndTag(ns)))
                } else {
                    tag_namespace(&rest[1..]).map(|ns| Markup::Token(TokenMarkup::StartTag(ns)))
                }
            }
            b'$' if rest.starts_with("${") => Some(Markup::Token(TokenMarkup::Expression)),
            b'%' if rest.starts_with("%{--") => Some(Markup::Comment("--}%")),
            b'%' if rest.starts_with("%{") => {
                Some(delimited(TokenKind::Scriptlet, 2, &["}%"], "scriptlet", true))
            }
            b'!' if rest.starts_with("!{") => {
                Some(delimited(TokenKind::Declaration, 2, &["}!", "}%"], "declaration", false))
            }
            b'@' if rest.starts_with("@{") => Some(Markup::Token(TokenMarkup::BraceDirective)),
            _ => None,
        }
    }

    fn skip_comment(&mut self, close: &str) -> Result<()> {
        let start = self.pos;
        match self.text[start + 4..].find(close) {
            Some(offset) => {
                self.pos = start + 4 + offset + close.len();
                Ok(())
            }
            None => Err(self.error(start, "Unterminated comment")),
        }
    }

    fn scan_html(&mut self) -> Token {
        let start = self.pos;
        let bytes = self.text.as_bytes();
        let mut pos = start + 1;
        while pos < bytes.len() {
            if pos - start >= self.max_html_length {
                while !self.text.is_char_boundary(pos) {
                    pos += 1;
                }
                break;
            }
            if matches!(bytes[pos], b'<' | b'$' | b'%' | b'!' | b'@') && self.markup_at(pos).is_some() {
                break;
            }
            pos += 1;
        }
        self.pos = pos;
        Token {
            kind: TokenKind::Html,
            text: self.text[start..pos].to_string(),
            line: self.line_at(start),
        }
    }

    fn scan_markup(&mut self, markup: TokenMarkup) -> Result<Token> {
        let start = self.pos;
        let line = self.line_at(start);
        let (kind, text, end) = match markup {
            TokenMarkup::Delimited {
                kind,
                open,
                close,
                what,
                decode_entities,
            } => {
                let body_start = start + open;
                let (offset, close_len) = close
                    .iter()
                    .filter_map(|c| self.text[body_start..].find(c).map(|i| (i, c.len())))
                    .min_by_key(|(i, _)| *i)
                    .ok_or_else(|| self.error(start, format!("Unterminated {}", what)))?;
                let mut text = self.text[body_start..body_start + offset].to_string();
                if decode_entities {
                    text = decode_markup_entities(&text);
                }
                (kind, text, body_start + offset + close_len)
            }
            TokenMarkup::Expression => {
                let close = find_closing_brace(&self.text, start + 2)
                    .ok_or_else(|| self.error(start, "Unclosed GSP expression"))?;
                (TokenKind::Expression, self.text[start + 2..close].to_string(), close + 1)
            }
            TokenMarkup::BraceDirective => {
                let close = find_closing_brace(&self.text, start + 2)
                    .ok_or_else(|| self.error(start, "Unterminated directive"))?;
                (TokenKind::Directive, self.text[start + 2..close].to_string(), close + 1)
            }
            TokenMarkup::EndTag(namespace) => {
                let name_start = start + 2 + namespace.len() + 1;
                let gt = self.text[name_start..]
                    .find('>')
                    .ok_or_else(|| self.error(start, format!("Unterminated end tag [{}:...]", namespace)))?;
                let name = self.text[name_start..name_start + gt].trim().to_string();
                (TokenKind::TagClose { namespace }, name, name_start + gt + 1)
            }
            TokenMarkup::StartTag(namespace) => {
                let name_start = start + 1 + namespace.len() + 1;
                let (close, empty) = self
                    .find_tag_end(name_start)
                    .ok_or_else(|| self.error(start, format!("Unterminated start tag [{}:...]", namespace)))?;
                let text_end = if empty { close - 1 } else { close };
                let text = self.text[name_start..text_end].to_string();
                (TokenKind::TagOpen { namespace, empty }, text, close + 1)
            }
        };
        self.pos = end;
        Ok(Token { kind, text, line })
    }

    /// Finds the `>` ending a start tag, skipping quoted values and `${}`.
    /// Returns its offset and whether the tag is self-closing.
    fn find_tag_end(&self, from: usize) -> Option<(usize, bool)> {
        let bytes = self.text.as_bytes();
        let mut quote: Option<u8> = None;
        let mut pos = from;
        while pos < bytes.len() {
            let b = bytes[pos];
            if b == b'$' && bytes.get(pos + 1) == Some(&b'{') {
                pos = find_closing_brace(&self.text, pos + 2)? + 1;
                continue;
            }
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if b == b'>' => {
                    let empty = pos > from && bytes[pos - 1] == b'/';
                    return Some((pos, empty));
                }
                None => {}
            }
            pos += 1;
        }
        None
    }
}

fn delimited(
    kind: TokenKind,
    open: usize,
    close: &'static [&'static str],
    what: &'static str,
    decode_entities: bool,
) -> Markup {
    Markup::Token(TokenMarkup::Delimited {
        kind,
        open,
        close,
        what,
        decode_entities,
    })
}

/// Returns the namespace if `rest` starts with `ns:` where `ns` matches
/// `^[A-Za-z]\w*$` and a tag name follows the colon.
fn tag_namespace(rest: &str) -> Option<String> {
    let mut chars = rest.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() => {}
        _ => return None,
    }
    for (i, c) in chars {
        if c == ':' {
            let next = rest[i + 1..].chars().next()?;
            return (next.is_alphabetic() || next == '_').then(|| rest[..i].to_string());
        }
        if !(c.is_alphanumeric() || c == '_') {
            return None;
        }
    }
    None
}

/// Finds the byte offset of the `}` closing an expression whose body starts
/// at `from`. Nested braces are counted; Lua string literals and long
/// brackets are skipped so braces inside them do not count.
pub(crate) fn find_closing_brace(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut pos = from;
    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            q @ (b'"' | b'\'') => {
                pos += 1;
                while pos < bytes.len() && bytes[pos] != q {
                    if bytes[pos] == b'\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return None;
                }
            }
            b'[' => {
                if let Some(level) = long_bracket_level(&bytes[pos..]) {
                    let close = format!("]{}]", "=".repeat(level));
                    let body = pos + level + 2;
                    pos = body + text.get(body..)?.find(&close)? + close.len();
                    continue;
                }
            }
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Level of a Lua long bracket opener (`[[`, `[=[`, ...) at the slice start.
fn long_bracket_level(bytes: &[u8]) -> Option<usize> {
    let level = bytes[1..].iter().take_while(|&&b| b == b'=').count();
    (bytes.get(1 + level) == Some(&b'[')).then_some(level)
}

fn decode_markup_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
