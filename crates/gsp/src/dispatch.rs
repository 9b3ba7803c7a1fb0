// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Tag dispatch from generated code to tag libraries.
//!
//! Resolves `namespace:name` through the page's
//! [`TagLibraryLookup`](crate::taglib::TagLibraryLookup), invokes it
//! according to its [`TagArity`], prints returned values, and
//! renders unknown-namespace tags back out as literal markup. Failures are
//! reduced to their root cause and re-raised at the call site of the
//! outermost tag.

use crate::error::{GspError, Result};
use crate::output::ProxyWriter;
use crate::runtime::{display_value, PageRuntime};
use crate::sitemesh::is_capture_tag;
use crate::taglib::{TagArity, TagAttributes, TagBody, TagCall};
use mlua::{Lua, Value};
use std::sync::Arc;

/// A tag reference from generated code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TagRef<'a> {
    pub uri: Option<&'a str>,
    pub namespace: &'a str,
    pub name: &'a str,
}

/// What a failure ultimately came from.
pub(crate) enum RootCause {
    /// A GSP error carried through Lua frames.
    Gsp(GspError),
    /// A plain Lua error message.
    Lua(String),
}

/// Walks callback and context wrappers down to the originating Lua error.
pub(crate) fn innermost(err: &mlua::Error) -> &mlua::Error {
    let mut current = err;
    loop {
        match current {
            mlua::Error::CallbackError { cause, .. } => current = cause.as_ref(),
            mlua::Error::WithContext { cause, .. } => current = cause.as_ref(),
            other => return other,
        }
    }
}

/// The GSP error carried by an external Lua error, if any.
pub(crate) fn carried_gsp_error(err: &mlua::Error) -> Option<&GspError> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<GspError>(),
        _ => None,
    }
}

/// Reduces an error to its root cause.
pub(crate) fn root_cause(err: GspError) -> RootCause {
    match err {
        GspError::LuaError(lua_err) => {
            let inner = innermost(&lua_err);
            match carried_gsp_error(inner) {
                Some(GspError::LuaError(nested)) => RootCause::Lua(innermost(nested).to_string()),
                Some(gsp) => RootCause::Gsp(gsp.clone()),
                None => RootCause::Lua(inner.to_string()),
            }
        }
        other => RootCause::Gsp(other),
    }
}

/// Converts a Lua error raised by page code, preferring a carried GSP error.
pub(crate) fn from_lua_error(err: mlua::Error) -> GspError {
    match carried_gsp_error(innermost(&err)) {
        Some(gsp) => gsp.clone(),
        None => GspError::LuaError(err),
    }
}

/// Formats attributes as markup, ` name="value"` each. Values containing
/// only double quotes are single-quoted; values mixing both quote kinds
/// are double-quoted with `"` escaped as `&quot;`.
pub fn format_attributes<'a>(
    lua: &Lua,
    attrs: impl Iterator<Item = (&'a str, &'a Value)>,
) -> Result<String> {
    let mut text = String::new();
    for (name, value) in attrs {
        let value = display_value(lua, value)?;
        text.push(' ');
        text.push_str(name);
        text.push('=');
        match (value.contains('"'), value.contains('\'')) {
            (true, false) => {
                text.push('\'');
                text.push_str(&value);
                text.push('\'');
            }
            (true, true) => {
                text.push('"');
                text.push_str(&value.replace('"', "&quot;"));
                text.push('"');
            }
            _ => {
                text.push('"');
                text.push_str(&value);
                text.push('"');
            }
        }
    }
    Ok(text)
}

fn attributes_from(value: &Value) -> Result<TagAttributes> {
    match value {
        Value::Nil => Ok(TagAttributes::new()),
        Value::UserData(ud) => Ok(ud.borrow::<TagAttributes>()?.clone()),
        other => Err(GspError::OutputError(format!(
            "Expected tag attributes, found {}",
            other.type_name()
        ))),
    }
}

fn body_from(value: &Value) -> Result<TagBody> {
    match value {
        Value::Nil => Ok(TagBody::Empty),
        Value::UserData(ud) => Ok(ud.borrow::<TagBody>()?.clone()),
        other => Err(GspError::OutputError(format!(
            "Expected a tag body, found {}",
            other.type_name()
        ))),
    }
}

/// Invokes a tag on behalf of generated code.
pub(crate) fn invoke_tag(
    lua: &Lua,
    rt: &PageRuntime,
    tag: TagRef<'_>,
    line: usize,
    attrs: &Value,
    body: &Value,
) -> Result<()> {
    let attrs = attributes_from(attrs)?;
    let body = body_from(body)?;

    let resolved = match tag.uri {
        Some(uri) => rt
            .tags
            .resolve_uri(uri, tag.name)
            .map(|i| (i, rt.tags.uri_returns_value(uri, tag.name))),
        None => rt
            .tags
            .resolve(tag.namespace, tag.name)
            .map(|i| (i, rt.tags.returns_value(tag.namespace, tag.name))),
    };

    let Some((invokable, returns_value)) = resolved else {
        if tag.uri.is_none() && !rt.tags.has_namespace(tag.namespace) {
            tracing::trace!("Passing through unknown tag {}:{}", tag.namespace, tag.name);
            return passthrough(lua, &rt.out, tag, &attrs, &body).map_err(|e| attribute_error(rt, tag, line, e));
        }
        return Err(GspError::TagInvocationError {
            page: rt.page.name().to_string(),
            line,
            message: format!(
                "Tag [{}:{}] does not exist. No tag library found for namespace: {}",
                tag.namespace, tag.name, tag.namespace
            ),
            cause: None,
        });
    };

    let outcome = (|| -> Result<()> {
        let empty = TagBody::Empty;
        let call = TagCall {
            lua,
            namespace: tag.namespace,
            name: tag.name,
            attrs: &attrs,
            body: match invokable.arity() {
                TagArity::AttrsOnly => &empty,
                TagArity::AttrsAndBody => &body,
            },
            out: &rt.out,
            context: &rt.context,
        };
        let result = invokable.invoke(&call)?;
        if returns_value {
            write_result(lua, &rt.out, &result)?;
        }
        if invokable.arity() == TagArity::AttrsOnly {
            body.render_into(&rt.out)?;
        }
        Ok(())
    })();

    outcome.map_err(|e| attribute_error(rt, tag, line, e))
}

fn write_result(lua: &Lua, out: &ProxyWriter, result: &Value) -> Result<()> {
    match result {
        Value::Nil => Ok(()),
        Value::UserData(ud) if ud.is::<ProxyWriter>() => Ok(()),
        value => out.write_str(&display_value(lua, value)?),
    }
}

/// Writes an unknown tag back out as markup, rendering its body in place.
fn passthrough(lua: &Lua, out: &ProxyWriter, tag: TagRef<'_>, attrs: &TagAttributes, body: &TagBody) -> Result<()> {
    let attributes = format_attributes(lua, attrs.iter())?;
    if body.is_empty() {
        return out.write_str(&format!("<{}:{}{}/>", tag.namespace, tag.name, attributes));
    }
    out.write_str(&format!("<{}:{}{}>", tag.namespace, tag.name, attributes))?;
    body.render_into(out)?;
    out.write_str(&format!("</{}:{}>", tag.namespace, tag.name))
}

/// Re-raises a tag failure at this call site.
///
/// Capture tags propagate their root cause untouched. Otherwise a nested
/// tag failure keeps its message but moves to this page and line, so the
/// outermost call site wins.
fn attribute_error(rt: &PageRuntime, tag: TagRef<'_>, line: usize, err: GspError) -> GspError {
    let root = root_cause(err);
    if is_capture_tag(tag.name) {
        return match root {
            RootCause::Gsp(e) => e,
            RootCause::Lua(message) => GspError::RenderError {
                page: rt.page.name().to_string(),
                line,
                message: rt.translate(&message),
            },
        };
    }
    match root {
        RootCause::Gsp(GspError::TagInvocationError { message, cause, .. }) => GspError::TagInvocationError {
            page: rt.page.name().to_string(),
            line,
            message,
            cause,
        },
        RootCause::Gsp(other) => GspError::TagInvocationError {
            page: rt.page.name().to_string(),
            line,
            message: format!("Error executing tag <{}:{}>: {}", tag.namespace, tag.name, other),
            cause: Some(Arc::new(other)),
        },
        RootCause::Lua(message) => GspError::TagInvocationError {
            page: rt.page.name().to_string(),
            line,
            message: format!(
                "Error executing tag <{}:{}>: {}",
                tag.namespace,
                tag.name,
                rt.translate(&message)
            ),
            cause: None,
        },
    }
}
