// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The Lua-facing runtime of a rendering page.
//!
//! Generated pages receive a [`PageRuntime`] as `__page` and call back into
//! it to write static fragments, print expressions, build tag bodies and
//! dispatch tags. Scriptlets see the shared proxy writer as `out`.

use crate::codec::Codec;
use crate::dispatch::{self, TagRef};
use crate::error::{GspError, Result};
use crate::output::{OutputContext, ProxyWriter};
use crate::page::CompiledPage;
use crate::taglib::{TagAttributes, TagBody, TagLibraryLookup};
use mlua::{
    Function, Lua, MetaMethod, Table, UserData, UserDataFields, UserDataMethods, Value, Variadic,
};
use std::sync::Arc;

/// A value that is written without applying the page codec.
#[derive(Debug, Clone)]
pub struct RawValue(pub String);

impl UserData for RawValue {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.clone()));
    }
}

impl UserData for ProxyWriter {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("print", |lua, this, value: Value| write_value(lua, this, &value, ""));
        methods.add_method("write", |lua, this, value: Value| write_value(lua, this, &value, ""));
        methods.add_method("println", |lua, this, value: Option<Value>| {
            write_value(lua, this, &value.unwrap_or(Value::Nil), "\n")
        });
        methods.add_meta_method(MetaMethod::Shl, |lua, this, value: Value| {
            write_value(lua, this, &value, "")?;
            Ok(this.clone())
        });
    }
}

fn write_value(lua: &Lua, out: &ProxyWriter, value: &Value, suffix: &str) -> mlua::Result<()> {
    let mut text = display_value(lua, value)?;
    text.push_str(suffix);
    out.write_str(&text).map_err(GspError::into_lua)
}

/// Renders a Lua value as output text.
///
/// `nil` and writers render as nothing, raw values as their content, and
/// everything else as Lua's `tostring` would.
pub fn display_value(lua: &Lua, value: &Value) -> mlua::Result<String> {
    match value {
        Value::Nil => Ok(String::new()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        Value::UserData(ud) if ud.is::<RawValue>() => Ok(ud.borrow::<RawValue>()?.0.clone()),
        Value::UserData(ud) if ud.is::<ProxyWriter>() => Ok(String::new()),
        other => lua.globals().get::<Function>("tostring")?.call::<String>(other.clone()),
    }
}

/// Template truthiness: `nil`, `false`, zero, NaN, the empty string and an
/// empty table are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Nil => false,
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.as_bytes().is_empty(),
        Value::Table(t) => !t.is_empty(),
        _ => true,
    }
}

/// The sequence `g:each` iterates over.
///
/// Sequences iterate as themselves; maps become `{key = k, value = v}`
/// entries ordered by key; `nil` is empty and any other value is a
/// single item.
pub fn iteration_items(lua: &Lua, value: Value) -> mlua::Result<Table> {
    match value {
        Value::Nil => lua.create_table(),
        Value::Table(table) => {
            if table.raw_len() > 0 || table.is_empty() {
                return Ok(table);
            }
            let mut entries = Vec::new();
            table.for_each(|key: Value, value: Value| {
                entries.push((display_value(lua, &key)?, key, value));
                Ok(())
            })?;
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let items = lua.create_table_with_capacity(entries.len(), 0)?;
            for (index, (_, key, value)) in entries.into_iter().enumerate() {
                let entry = lua.create_table_with_capacity(0, 2)?;
                entry.raw_set("key", key)?;
                entry.raw_set("value", value)?;
                items.raw_set(index + 1, entry)?;
            }
            Ok(items)
        }
        other => lua.create_sequence_from([other]),
    }
}

/// Per-render state handed to the generated render function.
pub struct PageRuntime {
    pub(crate) page: Arc<CompiledPage>,
    pub(crate) codec: Option<Arc<dyn Codec>>,
    pub(crate) tags: Arc<dyn TagLibraryLookup>,
    pub(crate) out: ProxyWriter,
    pub(crate) context: OutputContext,
}

impl PageRuntime {
    /// Creates the runtime for one render of `page`.
    pub fn new(
        page: Arc<CompiledPage>,
        codec: Option<Arc<dyn Codec>>,
        tags: Arc<dyn TagLibraryLookup>,
        out: ProxyWriter,
        context: OutputContext,
    ) -> Self {
        Self {
            page,
            codec,
            tags,
            out,
            context,
        }
    }

    fn part(&self, index: usize) -> Result<&str> {
        self.page
            .static_fragments()
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| GspError::RenderError {
                page: self.page.name().to_string(),
                line: 0,
                message: format!("Static fragment #{} does not exist", index),
            })
    }

    fn print(&self, lua: &Lua, value: &Value) -> Result<()> {
        if let Value::UserData(ud) = value {
            if let Ok(raw) = ud.borrow::<RawValue>() {
                return self.out.write_str(&raw.0);
            }
        }
        let text = display_value(lua, value)?;
        match &self.codec {
            Some(codec) => self.out.write_str(&codec.encode(&text)),
            None => self.out.write_str(&text),
        }
    }

    /// Attributes an expression failure to its template line.
    fn expression_error(&self, expression: &str, line: usize, err: mlua::Error) -> GspError {
        match dispatch::root_cause(GspError::LuaError(err)) {
            dispatch::RootCause::Gsp(e) if e.line().is_some() => e,
            dispatch::RootCause::Gsp(e) => GspError::ExpressionError {
                page: self.page.name().to_string(),
                line,
                expression: expression.trim().to_string(),
                message: e.to_string(),
            },
            dispatch::RootCause::Lua(message) => GspError::ExpressionError {
                page: self.page.name().to_string(),
                line,
                expression: expression.trim().to_string(),
                message: self.translate(&message),
            },
        }
    }

    /// Rewrites generated-source positions in a Lua message.
    pub(crate) fn translate(&self, message: &str) -> String {
        self.page
            .line_numbers()
            .translate_error(self.page.class_name(), self.page.name(), message)
    }
}

impl UserData for PageRuntime {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("out", |_, this| Ok(this.out.clone()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("part", |_, this, index: usize| {
            let text = this.part(index).map_err(GspError::into_lua)?;
            this.out.write_str(text).map_err(GspError::into_lua)
        });

        methods.add_method("print", |lua, this, value: Value| {
            this.print(lua, &value).map_err(GspError::into_lua)
        });

        methods.add_method(
            "evaluate",
            |_, this, (expression, line, thunk): (String, usize, Function)| {
                thunk
                    .call::<Value>(())
                    .map_err(|e| this.expression_error(&expression, line, e).into_lua())
            },
        );

        methods.add_method("attrs", |_, _, pairs: Variadic<Value>| {
            let mut attrs = TagAttributes::new();
            for pair in pairs.chunks(2) {
                match pair {
                    [Value::String(name), value] => attrs.push(name.to_str()?.to_string(), value.clone()),
                    [Value::String(name)] => attrs.push(name.to_str()?.to_string(), Value::Nil),
                    _ => {
                        return Err(mlua::Error::RuntimeError(
                            "attribute names must be strings".into(),
                        ))
                    }
                }
            }
            Ok(attrs)
        });

        methods.add_method("concat", |lua, _, pieces: Variadic<Value>| {
            let mut text = String::new();
            for piece in pieces.iter() {
                text.push_str(&display_value(lua, piece)?);
            }
            Ok(text)
        });

        methods.add_method("body", |_, this, function: Function| {
            Ok(TagBody::Closure {
                function,
                context: this.context.clone(),
            })
        });

        methods.add_method("part_body", |_, this, index: usize| {
            let text = this.part(index).map_err(GspError::into_lua)?;
            Ok(TagBody::Constant(text.to_string()))
        });

        methods.add_method(
            "invoke_tag",
            |lua, this, (name, namespace, line, attrs, body): (String, String, usize, Value, Value)| {
                let tag = TagRef {
                    uri: None,
                    namespace: &namespace,
                    name: &name,
                };
                dispatch::invoke_tag(lua, this, tag, line, &attrs, &body).map_err(GspError::into_lua)
            },
        );

        methods.add_method(
            "invoke_uri_tag",
            |lua,
             this,
             (uri, namespace, name, line, attrs, body): (String, String, String, usize, Value, Value)| {
                let tag = TagRef {
                    uri: Some(&uri),
                    namespace: &namespace,
                    name: &name,
                };
                dispatch::invoke_tag(lua, this, tag, line, &attrs, &body).map_err(GspError::into_lua)
            },
        );

        methods.add_method("items", |lua, _, value: Value| iteration_items(lua, value));
        methods.add_method("truthy", |_, _, value: Value| Ok(is_truthy(&value)));
        methods.add_method("raw", |lua, _, value: Value| Ok(RawValue(display_value(lua, &value)?)));
    }
}

/// Installs the `raw` global, marking a value as already encoded.
pub fn register_globals(lua: &Lua) -> mlua::Result<()> {
    let raw = lua.create_function(|lua, value: Value| Ok(RawValue(display_value(lua, &value)?)))?;
    lua.globals().set("raw", raw)
}
