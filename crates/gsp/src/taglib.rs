// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Tag library lookup and the types tag implementations work with.
//!
//! Library tags are plain Rust closures registered per namespace in a
//! [`TagLibraryRegistry`]. Generated pages reach them through the dispatch
//! runtime, which hands every invocation a [`TagCall`] describing the
//! attributes, the body and the output target.
//!
//! # Example
//!
//! ```rust,no_run
//! use gsp::taglib::{TagArity, TagLibraryRegistry};
//!
//! let mut tags = TagLibraryRegistry::new();
//! tags.register("my", "shout", TagArity::AttrsAndBody, |call| {
//!     let text = call.body()?;
//!     call.write(&text.to_uppercase())?;
//!     Ok(mlua::Value::Nil)
//! });
//! ```

use crate::error::{GspError, Result};
use crate::output::{lock, OutputBuffer, OutputContext, ProxyWriter, WriteTarget};
use crate::runtime::display_value;
use crate::sitemesh::{CAPTURE_NAMESPACE, META_CLOSING_ATTRIBUTE};
use mlua::{Function, Lua, MetaMethod, UserData, UserDataMethods, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How a tag implementation receives its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagArity {
    /// Attributes only; a non-empty body is rendered by the caller after
    /// the tag returns.
    AttrsOnly,
    /// Attributes and body; the tag decides whether and how often to
    /// render the body.
    AttrsAndBody,
}

type TagFn = dyn Fn(&TagCall<'_>) -> Result<Value> + Send + Sync;

/// A resolved tag implementation.
#[derive(Clone)]
pub struct Invokable {
    arity: TagArity,
    func: Arc<TagFn>,
}

impl Invokable {
    /// Wraps a closure.
    pub fn new<F>(arity: TagArity, func: F) -> Self
    where
        F: Fn(&TagCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            arity,
            func: Arc::new(func),
        }
    }

    /// The declared arity.
    pub fn arity(&self) -> TagArity {
        self.arity
    }

    /// Runs the implementation.
    pub fn invoke(&self, call: &TagCall<'_>) -> Result<Value> {
        (self.func)(call)
    }
}

impl fmt::Debug for Invokable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invokable").field("arity", &self.arity).finish()
    }
}

/// Resolves namespaced tags to implementations.
pub trait TagLibraryLookup: Send + Sync {
    /// The implementation of `namespace:name`, if any.
    fn resolve(&self, namespace: &str, name: &str) -> Option<Invokable>;

    /// True if the tag returns a value to print rather than writing output.
    fn returns_value(&self, namespace: &str, name: &str) -> bool;

    /// True if some library claims `namespace`. Tags in unknown namespaces
    /// are rendered as literal markup.
    fn has_namespace(&self, namespace: &str) -> bool;

    /// Resolves a tag declared through a `taglib` directive uri.
    fn resolve_uri(&self, _uri: &str, _name: &str) -> Option<Invokable> {
        None
    }

    /// [`returns_value`](Self::returns_value) for uri-declared tags.
    fn uri_returns_value(&self, _uri: &str, _name: &str) -> bool {
        false
    }
}

#[derive(Clone)]
struct RegisteredTag {
    invokable: Invokable,
    returns_value: bool,
}

/// In-memory [`TagLibraryLookup`].
#[derive(Clone, Default)]
pub struct TagLibraryRegistry {
    namespaces: HashMap<String, HashMap<String, RegisteredTag>>,
    uris: HashMap<String, String>,
}

impl TagLibraryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tag that writes its output.
    pub fn register<F>(&mut self, namespace: &str, name: &str, arity: TagArity, func: F) -> &mut Self
    where
        F: Fn(&TagCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(namespace, name, Invokable::new(arity, func), false)
    }

    /// Registers a tag whose non-nil return value is printed.
    pub fn register_returning<F>(&mut self, namespace: &str, name: &str, arity: TagArity, func: F) -> &mut Self
    where
        F: Fn(&TagCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(namespace, name, Invokable::new(arity, func), true)
    }

    /// Claims a namespace without registering tags in it.
    pub fn declare_namespace(&mut self, namespace: &str) -> &mut Self {
        self.namespaces.entry(namespace.to_string()).or_default();
        self
    }

    /// Serves tags declared with `<%@ taglib uri="uri" %>` from `namespace`.
    pub fn map_uri(&mut self, uri: &str, namespace: &str) -> &mut Self {
        self.uris.insert(uri.to_string(), namespace.to_string());
        self
    }

    fn insert(&mut self, namespace: &str, name: &str, invokable: Invokable, returns_value: bool) -> &mut Self {
        tracing::debug!("Registering tag {}:{}", namespace, name);
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(
                name.to_string(),
                RegisteredTag {
                    invokable,
                    returns_value,
                },
            );
        self
    }

    fn tag(&self, namespace: &str, name: &str) -> Option<&RegisteredTag> {
        self.namespaces.get(namespace).and_then(|tags| tags.get(name))
    }
}

impl TagLibraryLookup for TagLibraryRegistry {
    fn resolve(&self, namespace: &str, name: &str) -> Option<Invokable> {
        self.tag(namespace, name).map(|t| t.invokable.clone())
    }

    fn returns_value(&self, namespace: &str, name: &str) -> bool {
        self.tag(namespace, name).map(|t| t.returns_value).unwrap_or(false)
    }

    fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    fn resolve_uri(&self, uri: &str, name: &str) -> Option<Invokable> {
        self.uris.get(uri).and_then(|ns| self.resolve(ns, name))
    }

    fn uri_returns_value(&self, uri: &str, name: &str) -> bool {
        self.uris.get(uri).map(|ns| self.returns_value(ns, name)).unwrap_or(false)
    }
}

/// Ordered tag attributes, as written in the template.
#[derive(Debug, Clone, Default)]
pub struct TagAttributes {
    entries: Vec<(String, Value)>,
}

impl TagAttributes {
    /// Creates an empty attribute list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attribute, replacing an earlier one of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// The value of `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Attributes in template order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl UserData for TagAttributes {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_, this, name: String| {
            Ok(this.get(&name).cloned().unwrap_or(Value::Nil))
        });
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.len()));
    }
}

/// Arguments passed to a body when a tag renders it.
#[derive(Debug, Clone, Default)]
pub enum BodyArgs {
    /// No arguments; `it` keeps its enclosing value.
    #[default]
    None,
    /// Rebinds `it` for this invocation.
    It(Value),
    /// Introduces variables visible only inside the body.
    Vars(Vec<(String, Value)>),
}

/// The body of a tag element.
#[derive(Clone, Default)]
pub enum TagBody {
    /// `<ns:tag/>` or an element with nothing inside.
    #[default]
    Empty,
    /// A body consisting of a single static fragment.
    Constant(String),
    /// Generated code, rendered in a capturing buffer.
    Closure {
        /// The generated body function `function(__it, __vars)`.
        function: Function,
        /// Context whose output stack captures the body.
        context: OutputContext,
    },
}

impl TagBody {
    /// True for [`TagBody::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, TagBody::Empty)
    }

    /// Renders the body and returns its output.
    ///
    /// Closure bodies run with a fresh buffer pushed on the output stack;
    /// the buffer is popped again whether or not the body fails. A body
    /// that writes nothing yields its return value instead.
    pub fn invoke(&self, lua: &Lua, args: BodyArgs) -> Result<String> {
        match self {
            TagBody::Empty => Ok(String::new()),
            TagBody::Constant(text) => Ok(text.clone()),
            TagBody::Closure { function, context } => {
                let stack = context.stack_or_create()?;
                let buffer = OutputBuffer::new();
                lock(&stack)?.push(WriteTarget::Buffer(buffer.clone()))?;

                let result = match body_arguments(lua, args) {
                    Ok((it, vars)) => function.call::<Value>((it, vars)),
                    Err(e) => Err(e),
                };
                let popped = lock(&stack).and_then(|mut s| s.pop());
                let value = result?;
                popped?;

                let text = buffer.take()?;
                if !text.is_empty() {
                    return Ok(text);
                }
                match value {
                    Value::Nil => Ok(String::new()),
                    Value::UserData(ref ud) if ud.is::<ProxyWriter>() => Ok(String::new()),
                    other => Ok(display_value(lua, &other)?),
                }
            }
        }
    }

    /// Renders the body straight into the current output target.
    pub(crate) fn render_into(&self, out: &ProxyWriter) -> Result<()> {
        match self {
            TagBody::Empty => Ok(()),
            TagBody::Constant(text) => out.write_str(text),
            TagBody::Closure { function, .. } => {
                function.call::<()>((Value::Nil, Value::Nil))?;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for TagBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagBody::Empty => f.write_str("TagBody::Empty"),
            TagBody::Constant(text) => f.debug_tuple("TagBody::Constant").field(text).finish(),
            TagBody::Closure { .. } => f.write_str("TagBody::Closure"),
        }
    }
}

impl UserData for TagBody {}

fn body_arguments(lua: &Lua, args: BodyArgs) -> mlua::Result<(Value, Value)> {
    match args {
        BodyArgs::None => Ok((Value::Nil, Value::Nil)),
        BodyArgs::It(value) => Ok((value, Value::Nil)),
        BodyArgs::Vars(vars) => {
            let table = lua.create_table()?;
            for (name, value) in vars {
                table.raw_set(name, value)?;
            }
            Ok((Value::Nil, Value::Table(table)))
        }
    }
}

/// Everything a tag implementation receives.
pub struct TagCall<'a> {
    /// The Lua state the page runs in.
    pub lua: &'a Lua,
    /// Tag namespace.
    pub namespace: &'a str,
    /// Tag name.
    pub name: &'a str,
    /// Attributes in template order.
    pub attrs: &'a TagAttributes,
    /// The tag body. Always [`TagBody::Empty`] for [`TagArity::AttrsOnly`].
    pub body: &'a TagBody,
    /// Writer targeting the top of the output stack.
    pub out: &'a ProxyWriter,
    /// The render's output context.
    pub context: &'a OutputContext,
}

impl TagCall<'_> {
    /// Writes text to the current output target.
    pub fn write(&self, text: &str) -> Result<()> {
        self.out.write_str(text)
    }

    /// Renders the body without arguments.
    pub fn body(&self) -> Result<String> {
        self.body.invoke(self.lua, BodyArgs::None)
    }

    /// Renders the body with arguments.
    pub fn body_with(&self, args: BodyArgs) -> Result<String> {
        self.body.invoke(self.lua, args)
    }

    /// An attribute value.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// An attribute rendered as text, `None` when absent or nil.
    pub fn attr_string(&self, name: &str) -> Result<Option<String>> {
        match self.attrs.get(name) {
            None | Some(Value::Nil) => Ok(None),
            Some(value) => Ok(Some(display_value(self.lua, value)?)),
        }
    }

    /// An attribute that must be present.
    pub fn required_attr(&self, name: &str) -> Result<&Value> {
        self.attrs.get(name).ok_or_else(|| GspError::TagInvocationError {
            page: String::new(),
            line: 0,
            message: format!(
                "Tag [{}:{}] is missing required attribute [{}]",
                self.namespace, self.name, name
            ),
            cause: None,
        })
    }
}

/// Registers the `sitemesh` capture tags produced by layout preprocessing.
///
/// Each capture stores its rendered body in the [`OutputContext`] and
/// re-emits the original element. Meta elements are stored under
/// `meta.<name>`, content blocks under `page.<tag>` and are not re-emitted.
pub fn register_layout_capture(registry: &mut TagLibraryRegistry) {
    for (tag, element) in [("captureHead", "head"), ("captureTitle", "title"), ("captureBody", "body")] {
        registry.register(CAPTURE_NAMESPACE, tag, TagArity::AttrsAndBody, move |call| {
            let content = call.body()?;
            call.context.capture(element, content.clone())?;
            let attrs = crate::dispatch::format_attributes(call.lua, call.attrs.iter())?;
            call.write(&format!("<{}{}>{}</{}>", element, attrs, content, element))?;
            Ok(Value::Nil)
        });
    }

    registry.register(CAPTURE_NAMESPACE, "captureMeta", TagArity::AttrsOnly, |call| {
        let closing = call.attr_string(META_CLOSING_ATTRIBUTE)?.unwrap_or_default();
        let attrs = crate::dispatch::format_attributes(
            call.lua,
            call.attrs.iter().filter(|(name, _)| *name != META_CLOSING_ATTRIBUTE),
        )?;
        if let (Some(name), Some(content)) = (call.attr_string("name")?, call.attr_string("content")?) {
            call.context.capture(&format!("meta.{}", name), content)?;
        }
        call.write(&format!("<meta{}{}>", attrs, closing))?;
        Ok(Value::Nil)
    });

    registry.register(CAPTURE_NAMESPACE, "captureContent", TagArity::AttrsAndBody, |call| {
        let tag = call.attr_string("tag")?.unwrap_or_default();
        let content = call.body()?;
        call.context.capture(&format!("page.{}", tag), content)?;
        Ok(Value::Nil)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_by_namespace_and_uri() {
        let mut tags = TagLibraryRegistry::new();
        tags.register("my", "a", TagArity::AttrsOnly, |_| Ok(Value::Nil))
            .register_returning("my", "b", TagArity::AttrsOnly, |_| Ok(Value::Nil))
            .declare_namespace("empty")
            .map_uri("http://example.com/tags", "my");

        assert!(tags.resolve("my", "a").is_some());
        assert!(!tags.returns_value("my", "a"));
        assert!(tags.returns_value("my", "b"));
        assert!(tags.resolve("my", "c").is_none());
        assert!(tags.has_namespace("empty"));
        assert!(!tags.has_namespace("other"));
        assert_eq!(
            tags.resolve_uri("http://example.com/tags", "a").map(|i| i.arity()),
            Some(TagArity::AttrsOnly)
        );
        assert!(tags.uri_returns_value("http://example.com/tags", "b"));
    }

    #[test]
    fn attributes_keep_template_order() {
        let mut attrs = TagAttributes::new();
        attrs.push("b", Value::Integer(1));
        attrs.push("a", Value::Integer(2));
        attrs.push("b", Value::Integer(3));
        let names: Vec<&str> = attrs.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(matches!(attrs.get("b"), Some(Value::Integer(3))));
    }

    #[test]
    fn closure_body_captures_output_and_restores_stack() {
        let lua = Lua::new();
        let context = OutputContext::new();
        let stack = context.stack_or_create().unwrap();
        let page = OutputBuffer::new();
        stack.lock().unwrap().push(WriteTarget::Buffer(page.clone())).unwrap();
        let proxy = stack.lock().unwrap().proxy();
        let out = proxy.clone();

        let function = lua
            .create_function(move |_, (it, _vars): (Value, Value)| {
                let text = match it {
                    Value::Integer(n) => format!("<{}>", n),
                    _ => "<none>".to_string(),
                };
                out.write_str(&text).map_err(mlua::Error::external)?;
                Ok(())
            })
            .unwrap();
        let body = TagBody::Closure {
            function,
            context: context.clone(),
        };

        assert_eq!(body.invoke(&lua, BodyArgs::It(Value::Integer(7))).unwrap(), "<7>");
        assert_eq!(body.invoke(&lua, BodyArgs::None).unwrap(), "<none>");
        assert_eq!(context.depth(), 1);
        assert_eq!(page.contents().unwrap(), "");
    }

    #[test]
    fn failing_body_still_pops_its_buffer() {
        let lua = Lua::new();
        let context = OutputContext::new();
        let stack = context.stack_or_create().unwrap();
        stack.lock().unwrap().push(WriteTarget::Buffer(OutputBuffer::new())).unwrap();

        let function = lua.load("return function() error('boom') end").eval::<Function>().unwrap();
        let body = TagBody::Closure {
            function,
            context: context.clone(),
        };
        assert!(body.invoke(&lua, BodyArgs::None).is_err());
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn silent_body_yields_its_return_value() {
        let lua = Lua::new();
        let context = OutputContext::new();
        context
            .stack_or_create()
            .unwrap()
            .lock()
            .unwrap()
            .push(WriteTarget::Buffer(OutputBuffer::new()))
            .unwrap();
        let function = lua.load("return function() return 42 end").eval::<Function>().unwrap();
        let body = TagBody::Closure { function, context };
        assert_eq!(body.invoke(&lua, BodyArgs::None).unwrap(), "42");
        assert_eq!(TagBody::Constant("x".into()).invoke(&lua, BodyArgs::None).unwrap(), "x");
        assert_eq!(TagBody::Empty.invoke(&lua, BodyArgs::None).unwrap(), "");
    }
}
