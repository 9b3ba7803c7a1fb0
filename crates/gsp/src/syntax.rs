// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Built-in structural tags of the `g` namespace.
//!
//! These compile straight to Lua control flow instead of going through tag
//! dispatch. Conditionals share one slot per nesting depth in the render
//! function's `__cond` table, so an `else` can see whether its `if` ran.

use crate::codegen::{is_valid_lua_identifier, GspWriter};
use crate::error::{GspError, Result, SourceContext};
use crate::parser::AttrValue;

/// Namespace of the built-in tags.
pub const SYNTAX_NAMESPACE: &str = "g";

/// Everything a syntax tag needs to emit code.
pub(crate) struct SyntaxContext<'a> {
    pub writer: &'a mut GspWriter,
    pub page: &'a str,
    pub source: &'a str,
    pub name: &'a str,
    pub line: usize,
    pub depth: usize,
    pub attributes: &'a [(String, AttrValue)],
    pub development: bool,
}

impl SyntaxContext<'_> {
    pub fn error(&self, message: impl Into<String>) -> GspError {
        GspError::ParseError {
            page: self.page.to_string(),
            line: self.line,
            message: message.into(),
            source_context: Some(SourceContext::from_source(self.source, self.line)),
        }
    }

    fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Lua code for a required attribute.
    pub fn expression(&self, name: &str) -> Result<String> {
        self.attribute(name)
            .map(|value| value.to_lua(self.development, self.line))
            .ok_or_else(|| {
                self.error(format!(
                    "Tag [{}:{}] is missing required attribute [{}]",
                    SYNTAX_NAMESPACE, self.name, name
                ))
            })
    }

    /// A literal attribute naming a Lua variable.
    pub fn variable(&self, name: &str) -> Result<Option<String>> {
        match self.attribute(name) {
            None => Ok(None),
            Some(AttrValue::Literal(text)) if is_valid_lua_identifier(text.trim()) => {
                Ok(Some(text.trim().to_string()))
            }
            Some(_) => Err(self.error(format!(
                "Attribute [{}] of tag [{}:{}] must be a valid variable name",
                name, SYNTAX_NAMESPACE, self.name
            ))),
        }
    }
}

/// A tag compiled to control flow.
pub(crate) trait SyntaxTag: Sync {
    /// Buffered whitespace before the tag is written rather than dropped.
    fn keep_preceding_whitespace(&self) -> bool {
        true
    }

    /// Non-whitespace text may directly precede the tag.
    fn allow_preceding_content(&self) -> bool {
        true
    }

    /// Must directly follow a closed `if` or `elseif` at the same depth.
    fn continues_conditional(&self) -> bool {
        false
    }

    /// A following `else`/`elseif` may attach to this tag.
    fn opens_conditional(&self) -> bool {
        false
    }

    fn start(&self, ctx: &mut SyntaxContext<'_>) -> Result<()>;

    fn end(&self, ctx: &mut SyntaxContext<'_>) -> Result<()> {
        ctx.writer.dedent();
        ctx.writer.println("end");
        Ok(())
    }
}

struct EachTag;

impl SyntaxTag for EachTag {
    fn start(&self, ctx: &mut SyntaxContext<'_>) -> Result<()> {
        let items = ctx.expression("in")?;
        let var = ctx.variable("var")?.unwrap_or_else(|| "it".to_string());
        let status = ctx.variable("status")?;
        let depth = ctx.depth;
        ctx.writer.println(&format!(
            "for __i{}, {} in ipairs(__page:items({})) do",
            depth, var, items
        ));
        ctx.writer.indent();
        if let Some(status) = status {
            ctx.writer.println(&format!("local {} = __i{} - 1", status, depth));
        }
        Ok(())
    }
}

struct IfTag;

impl SyntaxTag for IfTag {
    fn opens_conditional(&self) -> bool {
        true
    }

    fn start(&self, ctx: &mut SyntaxContext<'_>) -> Result<()> {
        let test = ctx.expression("test")?;
        let depth = ctx.depth;
        ctx.writer
            .println(&format!("__cond[{}] = __page:truthy({})", depth, test));
        ctx.writer.println(&format!("if __cond[{}] then", depth));
        ctx.writer.indent();
        Ok(())
    }
}

struct ElseIfTag;

impl SyntaxTag for ElseIfTag {
    fn keep_preceding_whitespace(&self) -> bool {
        false
    }

    fn allow_preceding_content(&self) -> bool {
        false
    }

    fn continues_conditional(&self) -> bool {
        true
    }

    fn opens_conditional(&self) -> bool {
        true
    }

    fn start(&self, ctx: &mut SyntaxContext<'_>) -> Result<()> {
        let test = ctx.expression("test")?;
        let depth = ctx.depth;
        ctx.writer.println(&format!(
            "if not __cond[{0}] then __cond[{0}] = __page:truthy({1}) end",
            depth, test
        ));
        ctx.writer.println(&format!("if __cond[{}] then", depth));
        ctx.writer.indent();
        Ok(())
    }
}

struct ElseTag;

impl SyntaxTag for ElseTag {
    fn keep_preceding_whitespace(&self) -> bool {
        false
    }

    fn allow_preceding_content(&self) -> bool {
        false
    }

    fn continues_conditional(&self) -> bool {
        true
    }

    fn start(&self, ctx: &mut SyntaxContext<'_>) -> Result<()> {
        ctx.writer.println(&format!("if not __cond[{}] then", ctx.depth));
        ctx.writer.indent();
        Ok(())
    }
}

struct WhileTag;

impl SyntaxTag for WhileTag {
    fn start(&self, ctx: &mut SyntaxContext<'_>) -> Result<()> {
        let test = ctx.expression("test")?;
        ctx.writer
            .println(&format!("while __page:truthy({}) do", test));
        ctx.writer.indent();
        Ok(())
    }
}

/// The built-in tag called `name`, if any.
pub(crate) fn lookup(name: &str) -> Option<&'static dyn SyntaxTag> {
    match name {
        "each" => Some(&EachTag),
        "if" => Some(&IfTag),
        "elseif" => Some(&ElseIfTag),
        "else" => Some(&ElseTag),
        "while" => Some(&WhileTag),
        _ => None,
    }
}
