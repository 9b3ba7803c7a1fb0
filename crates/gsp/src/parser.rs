// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Two-pass GSP parser and Lua code generator.
//!
//! The first pass collects page directives and declarations; the second
//! replays the identical token stream and emits the page chunk:
//!
//! ```text
//! -- imports and declarations (chunk scope)
//! return function(__page, _ENV)
//!   local out = __page.out
//!   __page:part(0)
//!   __page:print(...)
//!   __page:invoke_tag("name", "ns", line, __page:attrs(...), body)
//! end
//! ```
//!
//! Static text is registered once per distinct fragment and written by
//! index. Whitespace-only runs are held back until the next construct
//! decides whether they survive. Library tag bodies stay in buffer mode
//! until a second piece of content proves they need a closure; a body of
//! exactly one fragment is passed as that fragment.

use crate::codec;
use crate::codegen::{lua_string_literal, GspWriter};
use crate::error::{GspError, Result, SourceContext};
use crate::page::class_name_for;
use crate::scanner::{find_closing_brace, Scanner, TokenKind, DEFAULT_MAX_HTML_LENGTH};
use crate::sitemesh::{add_capture_tags, directive_attributes, prescan_page_directives};
use crate::sourcemap::LineNumberMatrix;
use crate::syntax::{self, SyntaxContext, SYNTAX_NAMESPACE};
use std::collections::{BTreeMap, HashMap};

/// Content type of pages without a `contentType` directive.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html;charset=UTF-8";

/// Options controlling one compile.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Wrap expressions so failures report the template line and text.
    pub development: bool,
    /// Rewrite layout elements into capture tags before scanning.
    pub sitemesh_preprocess: bool,
    /// Codec for expression output when the page declares none.
    pub default_codec: Option<String>,
    /// Maximum length of one static text token.
    pub max_html_length: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            development: true,
            sitemesh_preprocess: false,
            default_codec: None,
            max_html_length: DEFAULT_MAX_HTML_LENGTH,
        }
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// Canonical page name.
    pub name: String,
    /// Generated chunk name.
    pub class_name: String,
    /// Generated Lua source.
    pub source: String,
    /// Generated line to template line mapping.
    pub line_numbers: LineNumberMatrix,
    /// Deduplicated static text, indexed by `__page:part(n)`.
    pub static_fragments: Vec<String>,
    /// Declared content type.
    pub content_type: String,
    /// Expression codec name, if any.
    pub codec: Option<String>,
    /// Tag prefixes declared with `taglib`, mapped to their uri.
    pub tag_uris: BTreeMap<String, String>,
}

/// An attribute value as written in a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Plain text.
    Literal(String),
    /// A whole-value `${...}` expression.
    Expression(String),
    /// Text with embedded `${...}` pieces.
    Interpolated(Vec<AttrPiece>),
}

/// One piece of an interpolated attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrPiece {
    /// Plain text.
    Literal(String),
    /// An embedded expression.
    Expression(String),
}

impl AttrValue {
    fn parse(value: &str) -> std::result::Result<Self, String> {
        if !value.contains("${") {
            return Ok(AttrValue::Literal(value.to_string()));
        }
        let mut pieces = Vec::new();
        let mut rest = 0;
        while let Some(offset) = value[rest..].find("${") {
            let start = rest + offset;
            if start > rest {
                pieces.push(AttrPiece::Literal(value[rest..start].to_string()));
            }
            let close = find_closing_brace(value, start + 2)
                .ok_or_else(|| format!("Unclosed expression in attribute value [{}]", value))?;
            pieces.push(AttrPiece::Expression(value[start + 2..close].to_string()));
            rest = close + 1;
        }
        if rest < value.len() {
            pieces.push(AttrPiece::Literal(value[rest..].to_string()));
        }
        match pieces.as_slice() {
            [AttrPiece::Expression(expr)] => Ok(AttrValue::Expression(expr.clone())),
            _ => Ok(AttrValue::Interpolated(pieces)),
        }
    }

    /// Lua code producing the value.
    pub(crate) fn to_lua(&self, development: bool, line: usize) -> String {
        match self {
            AttrValue::Literal(text) => lua_string_literal(text),
            AttrValue::Expression(expr) => expression_code(expr, development, line),
            AttrValue::Interpolated(pieces) => {
                let args: Vec<String> = pieces
                    .iter()
                    .map(|piece| match piece {
                        AttrPiece::Literal(text) => lua_string_literal(text),
                        AttrPiece::Expression(expr) => expression_code(expr, development, line),
                    })
                    .collect();
                format!("__page:concat({})", args.join(", "))
            }
        }
    }
}

fn expression_code(expr: &str, development: bool, line: usize) -> String {
    if development {
        format!(
            "__page:evaluate({}, {}, function() return ({}) end)",
            lua_string_literal(expr.trim()),
            line,
            expr
        )
    } else {
        format!("({})", expr)
    }
}

/// State of one open tag element.
#[derive(Debug, Clone)]
pub struct TagMeta {
    /// Tag name.
    pub name: String,
    /// Tag namespace.
    pub namespace: String,
    /// Attributes in template order.
    pub attributes: Vec<(String, AttrValue)>,
    /// Whether any attributes were written.
    pub has_attributes: bool,
    /// Self-closing element.
    pub empty: bool,
    /// Template line of the opening tag.
    pub line: usize,
    /// Nesting depth, unique among the open tags.
    pub index: usize,
    /// Body emission is deferred until content arrives.
    pub buffer_mode: bool,
    /// The single fragment seen while in buffer mode.
    pub buffered_part: Option<usize>,
    /// `taglib` uri the namespace was declared with.
    pub uri: Option<String>,
}

impl TagMeta {
    fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// Compiles one template into Lua source.
pub struct GspParser {
    name: String,
    class_name: String,
    scanner: Scanner,
    options: ParseOptions,
    writer: GspWriter,
    fragments: Vec<String>,
    fragment_index: HashMap<String, usize>,
    tag_stack: Vec<TagMeta>,
    whitespace: String,
    buffering_whitespace: bool,
    previous_non_whitespace: bool,
    last_conditional: Option<usize>,
    imports: Vec<(String, usize)>,
    declarations: Vec<(String, usize)>,
    content_type: String,
    codec: Option<String>,
    tag_uris: BTreeMap<String, String>,
}

impl GspParser {
    /// Prepares a parser for `source`, applying layout preprocessing when
    /// enabled by `options` or by the page's `sitemeshPreprocess` directive.
    pub fn new(name: impl Into<String>, source: &str, options: ParseOptions) -> Self {
        let name = name.into();
        let preprocess = prescan_page_directives(source)
            .get("sitemeshPreprocess")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(options.sitemesh_preprocess);
        let text = if preprocess {
            tracing::debug!("Applying layout capture preprocessing to {}", name);
            add_capture_tags(source)
        } else {
            source.to_string()
        };

        Self {
            class_name: class_name_for(&name),
            scanner: Scanner::new(name.clone(), text).with_max_html_length(options.max_html_length),
            name,
            codec: options.default_codec.clone(),
            options,
            writer: GspWriter::new(),
            fragments: Vec::new(),
            fragment_index: HashMap::new(),
            tag_stack: Vec::new(),
            whitespace: String::new(),
            buffering_whitespace: false,
            previous_non_whitespace: false,
            last_conditional: None,
            imports: Vec::new(),
            declarations: Vec::new(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            tag_uris: BTreeMap::new(),
        }
    }

    /// Runs both passes.
    pub fn parse(mut self) -> Result<ParsedPage> {
        self.collect_page_directives()?;
        self.scanner.reset();
        self.generate()?;

        let (source, line_numbers) = self.writer.finish();
        tracing::debug!(
            "Generated {} ({} lines, {} static fragments)",
            self.class_name,
            line_numbers.len(),
            self.fragments.len()
        );
        Ok(ParsedPage {
            name: self.name,
            class_name: self.class_name,
            source,
            line_numbers,
            static_fragments: self.fragments,
            content_type: self.content_type,
            codec: self.codec,
            tag_uris: self.tag_uris,
        })
    }

    fn error(&self, line: usize, message: impl Into<String>) -> GspError {
        GspError::ParseError {
            page: self.name.clone(),
            line,
            message: message.into(),
            source_context: Some(SourceContext::from_source(self.scanner.text(), line)),
        }
    }

    fn collect_page_directives(&mut self) -> Result<()> {
        loop {
            let token = self.scanner.next_token()?;
            match token.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::Directive => self.page_directive(&token.text, token.line)?,
                TokenKind::Declaration => self.declarations.push((token.text, token.line)),
                _ => {}
            }
        }
    }

    fn page_directive(&mut self, text: &str, line: usize) -> Result<()> {
        let attributes = directive_attributes(text);
        if text.trim_start().starts_with("taglib") {
            let find = |key: &str| attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
            return match (find("prefix"), find("uri")) {
                (Some(prefix), Some(uri)) => {
                    self.tag_uris.insert(prefix, uri);
                    Ok(())
                }
                _ => Err(self.error(line, "taglib directive requires [prefix] and [uri]")),
            };
        }

        for (key, value) in attributes {
            match key.as_str() {
                "import" => self.imports.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|module| !module.is_empty())
                        .map(|module| (module.to_string(), line)),
                ),
                "contentType" => self.content_type = value,
                "expressionCodec" | "defaultCodec" => {
                    if codec::lookup(&value).is_none() {
                        return Err(self.error(line, format!("Unknown codec [{}]", value)));
                    }
                    self.codec = Some(value);
                }
                "sitemeshPreprocess" => {}
                other => tracing::debug!("Ignoring page directive [{}] in {}", other, self.name),
            }
        }
        Ok(())
    }

    fn generate(&mut self) -> Result<()> {
        self.writer.println(&format!("-- Generated from {}", self.name));
        self.writer.println("local ipairs, setmetatable = ipairs, setmetatable");
        for (module, line) in std::mem::take(&mut self.imports) {
            let local = module.rsplit('.').next().unwrap_or(&module).to_string();
            self.writer.set_source_line(line);
            self.writer.println(&format!(
                "local {} = require({})",
                local,
                lua_string_literal(&module)
            ));
        }
        for (code, line) in std::mem::take(&mut self.declarations) {
            self.writer.print_code(&code, line);
        }

        self.writer.set_source_line(0);
        self.writer.println("return function(__page, _ENV)");
        self.writer.indent();
        self.writer.println("local out = __page.out");
        self.writer.println("local __cond = {}");

        loop {
            let token = self.scanner.next_token()?;
            self.writer.set_source_line(token.line);
            match token.kind {
                TokenKind::Html => self.html(&token.text)?,
                TokenKind::TagOpen { namespace, empty } => {
                    self.start_tag(&namespace, &token.text, empty, token.line)?
                }
                TokenKind::Eof => {
                    self.flush_buffered_whitespace();
                    if let Some(first) = self.tag_stack.first() {
                        let open: Vec<String> = self.tag_stack.iter().map(TagMeta::qualified_name).collect();
                        return Err(self.error(first.line, format!("Tags were not closed! [{}]", open.join(", "))));
                    }
                    break;
                }
                kind => {
                    self.flush_buffered_whitespace();
                    self.previous_non_whitespace = false;
                    match kind {
                        TokenKind::Expression => self.expression(&token.text, token.line, false)?,
                        TokenKind::ScriptletExpression => self.expression(&token.text, token.line, true)?,
                        TokenKind::Scriptlet => self.scriptlet(&token.text, token.line),
                        TokenKind::TagClose { namespace } => self.end_tag(&namespace, &token.text, token.line)?,
                        _ => {}
                    }
                }
            }
        }

        self.writer.dedent();
        self.writer.println("end");
        Ok(())
    }

    fn html(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let is_whitespace = text.chars().all(char::is_whitespace);
        if !is_whitespace && self.buffering_whitespace {
            self.flush_buffered_whitespace();
        } else {
            self.buffering_whitespace = is_whitespace;
        }
        self.previous_non_whitespace = !is_whitespace;
        if !is_whitespace {
            self.last_conditional = None;
        }

        if self.buffering_whitespace {
            self.whitespace.push_str(text);
        } else {
            self.append_html_part(text);
        }
        Ok(())
    }

    fn flush_buffered_whitespace(&mut self) {
        if self.buffering_whitespace && !self.whitespace.is_empty() {
            let text = std::mem::take(&mut self.whitespace);
            self.append_html_part(&text);
        }
        self.buffering_whitespace = false;
    }

    fn clear_buffered_whitespace(&mut self) {
        self.whitespace.clear();
        self.buffering_whitespace = false;
    }

    fn append_html_part(&mut self, text: &str) {
        let index = match self.fragment_index.get(text) {
            Some(&index) => index,
            None => {
                let index = self.fragments.len();
                self.fragments.push(text.to_string());
                self.fragment_index.insert(text.to_string(), index);
                index
            }
        };
        self.html_part_println(index);
    }

    fn html_part_println(&mut self, index: usize) {
        if let Some(top) = self.tag_stack.last_mut() {
            if top.buffer_mode && top.buffered_part.is_none() {
                top.buffered_part = Some(index);
                return;
            }
        }
        self.flush_tag_buffering();
        self.writer.println(&format!("__page:part({})", index));
    }

    /// Leaves buffer mode for the innermost tag, opening its body closure.
    fn flush_tag_buffering(&mut self) {
        let Some(top) = self.tag_stack.last_mut() else {
            return;
        };
        if !top.buffer_mode {
            return;
        }
        top.buffer_mode = false;
        let index = top.index;
        let buffered = top.buffered_part;

        self.writer.println("do");
        self.writer.indent();
        self.writer.println(&format!(
            "local __body{} = __page:body(function(__it, __vars)",
            index
        ));
        self.writer.indent();
        self.writer.println("local it = __it == nil and it or __it");
        self.writer
            .println("local _ENV = __vars and setmetatable(__vars, {__index = _ENV}) or _ENV");
        if let Some(part) = buffered {
            self.writer.println(&format!("__page:part({})", part));
        }
    }

    fn expression(&mut self, text: &str, line: usize, raw: bool) -> Result<()> {
        if text.trim().is_empty() {
            return Err(self.error(line, "Empty expression"));
        }
        self.flush_tag_buffering();
        self.last_conditional = None;
        let code = expression_code(text, self.options.development, line);
        if raw {
            self.writer.println(&format!("out:print({})", code));
        } else {
            self.writer.println(&format!("__page:print({})", code));
        }
        Ok(())
    }

    fn scriptlet(&mut self, text: &str, line: usize) {
        self.flush_tag_buffering();
        self.last_conditional = None;
        self.writer.print_code(text, line);
    }

    fn parse_attributes(&self, text: &str, tag: &str, line: usize) -> Result<Vec<(String, AttrValue)>> {
        let mut attributes = Vec::new();
        let mut rest = text.trim_start();
        while !rest.is_empty() {
            let name_end = rest
                .find(|c: char| c.is_whitespace() || c == '=')
                .unwrap_or(rest.len());
            let name = &rest[..name_end];
            if name.is_empty() {
                return Err(self.error(line, format!("Malformed attributes in tag [{}]", tag)));
            }
            rest = rest[name_end..].trim_start();
            rest = rest.strip_prefix('=').ok_or_else(|| {
                self.error(line, format!("Attribute [{}] of tag [{}] is missing '='", name, tag))
            })?;
            rest = rest.trim_start();

            let quote = match rest.chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => {
                    return Err(self.error(
                        line,
                        format!("Value of attribute [{}] of tag [{}] must be quoted", name, tag),
                    ))
                }
            };
            let close = find_attribute_end(rest, quote).ok_or_else(|| {
                self.error(line, format!("Unterminated value of attribute [{}] of tag [{}]", name, tag))
            })?;
            let value = AttrValue::parse(&rest[1..close]).map_err(|message| self.error(line, message))?;
            attributes.push((name.to_string(), value));
            rest = rest[close + 1..].trim_start();
        }
        Ok(attributes)
    }

    fn start_tag(&mut self, namespace: &str, text: &str, empty: bool, line: usize) -> Result<()> {
        let text = text.trim();
        let name_end = text.find(char::is_whitespace).unwrap_or(text.len());
        let name = &text[..name_end];
        let qualified = format!("{}:{}", namespace, name);
        if name.is_empty() {
            return Err(self.error(line, format!("Tag [{}] has no name", qualified)));
        }
        let attributes = self.parse_attributes(&text[name_end..], &qualified, line)?;

        self.flush_tag_buffering();

        let index = self.tag_stack.len() + 1;
        let syntax_tag = (namespace == SYNTAX_NAMESPACE).then(|| syntax::lookup(name)).flatten();
        let mut meta = TagMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            has_attributes: !attributes.is_empty(),
            attributes,
            empty,
            line,
            index,
            buffer_mode: false,
            buffered_part: None,
            uri: self.tag_uris.get(namespace).cloned(),
        };

        match syntax_tag {
            Some(tag) => {
                if tag.keep_preceding_whitespace() && self.buffering_whitespace {
                    self.flush_buffered_whitespace();
                } else if !tag.allow_preceding_content() && self.previous_non_whitespace {
                    return Err(self.error(
                        line,
                        format!(
                            "Tag [{}] cannot have non-whitespace characters directly preceding it.",
                            name
                        ),
                    ));
                } else {
                    self.clear_buffered_whitespace();
                }

                if tag.continues_conditional() && self.last_conditional != Some(index) {
                    return Err(self.error(
                        line,
                        format!("Tag [{}] must directly follow a [g:if] or [g:elseif] tag", qualified),
                    ));
                }
                self.last_conditional = None;

                let source = self.scanner.text().to_string();
                let mut ctx = SyntaxContext {
                    writer: &mut self.writer,
                    page: &self.name,
                    source: &source,
                    name,
                    line,
                    depth: index,
                    attributes: &meta.attributes,
                    development: self.options.development,
                };
                tag.start(&mut ctx)?;
            }
            None => {
                self.flush_buffered_whitespace();
                self.last_conditional = None;
                meta.buffer_mode = !empty;
            }
        }

        self.tag_stack.push(meta);
        if empty {
            self.end_tag(namespace, name, line)?;
        }
        Ok(())
    }

    fn end_tag(&mut self, namespace: &str, name: &str, line: usize) -> Result<()> {
        let qualified = format!("{}:{}", namespace, name.trim());
        let Some(meta) = self.tag_stack.pop() else {
            return Err(self.error(line, format!("Found closing tag with no opening [{}]", qualified)));
        };
        if meta.namespace != namespace || meta.name != name.trim() {
            return Err(self.error(meta.line, format!("Tag [{}] was not closed", meta.qualified_name())));
        }

        let syntax_tag = (meta.namespace == SYNTAX_NAMESPACE)
            .then(|| syntax::lookup(&meta.name))
            .flatten();
        if let Some(tag) = syntax_tag {
            let source = self.scanner.text().to_string();
            let mut ctx = SyntaxContext {
                writer: &mut self.writer,
                page: &self.name,
                source: &source,
                name: &meta.name,
                line: meta.line,
                depth: meta.index,
                attributes: &meta.attributes,
                development: self.options.development,
            };
            tag.end(&mut ctx)?;
            self.last_conditional = tag.opens_conditional().then_some(meta.index);
            return Ok(());
        }

        self.last_conditional = None;
        let closure = !meta.empty && !meta.buffer_mode;
        let body = if closure {
            self.writer.dedent();
            self.writer.println("end)");
            format!("__body{}", meta.index)
        } else {
            match meta.buffered_part {
                Some(part) if meta.buffer_mode => format!("__page:part_body({})", part),
                _ => "nil".to_string(),
            }
        };

        let attributes: Vec<String> = meta
            .attributes
            .iter()
            .map(|(attr, value)| {
                format!(
                    "{}, {}",
                    lua_string_literal(attr),
                    value.to_lua(self.options.development, meta.line)
                )
            })
            .collect();
        let attrs = format!("__page:attrs({})", attributes.join(", "));

        self.writer.set_source_line(meta.line);
        let call = match &meta.uri {
            Some(uri) => format!(
                "__page:invoke_uri_tag({}, {}, {}, {}, {}, {})",
                lua_string_literal(uri),
                lua_string_literal(&meta.namespace),
                lua_string_literal(&meta.name),
                meta.line,
                attrs,
                body
            ),
            None => format!(
                "__page:invoke_tag({}, {}, {}, {}, {})",
                lua_string_literal(&meta.name),
                lua_string_literal(&meta.namespace),
                meta.line,
                attrs,
                body
            ),
        };
        self.writer.println(&call);
        if closure {
            self.writer.dedent();
            self.writer.println("end");
        }
        Ok(())
    }
}

/// Offset of the quote closing an attribute value that starts with `quote`,
/// skipping over `${...}` expressions.
fn find_attribute_end(text: &str, quote: char) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut pos = 1;
    while pos < bytes.len() {
        if bytes[pos] == b'$' && bytes.get(pos + 1) == Some(&b'{') {
            pos = find_closing_brace(text, pos + 2)? + 1;
            continue;
        }
        if bytes[pos] == quote as u8 {
            return Some(pos);
        }
        pos += 1;
    }
    None
}

/// Compiles `source` to Lua with the given options.
pub fn parse(name: &str, source: &str, options: ParseOptions) -> Result<ParsedPage> {
    GspParser::new(name, source, options).parse()
}
