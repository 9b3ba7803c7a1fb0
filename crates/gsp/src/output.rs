// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Output redirection.
//!
//! Each rendering context owns one [`OutputStack`] of write targets. All
//! page and tag output goes through a single shared [`ProxyWriter`] whose
//! delegate is swapped on every push and pop, so a writer handle obtained
//! before a tag started capturing transparently writes into that tag's
//! buffer.
//!
//! ```text
//!  push(buffer)        proxy ──► buffer
//!  ┌──────────────┐
//!  │ buffer       │ ◄── top: proxy delegate == top.unwrapped
//!  │ response     │
//!  └──────────────┘
//! ```
//!
//! The stack lives in an [`OutputContext`], created lazily on first use and
//! torn down when the context is cleaned up or dropped.

use crate::error::{GspError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| GspError::OutputError(format!("Failed to acquire output lock: {}", e)))
}

/// A shared, growable string buffer.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<String>>,
}

impl OutputBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text.
    pub fn write_str(&self, s: &str) -> Result<()> {
        lock(&self.inner)?.push_str(s);
        Ok(())
    }

    /// Copy of the buffered text.
    pub fn contents(&self) -> Result<String> {
        Ok(lock(&self.inner)?.clone())
    }

    /// Takes the buffered text, leaving the buffer empty.
    pub fn take(&self) -> Result<String> {
        Ok(std::mem::take(&mut *lock(&self.inner)?))
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(lock(&self.inner)?.is_empty())
    }

    /// True if both handles share the same storage.
    pub fn ptr_eq(&self, other: &OutputBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// An externally supplied sink.
pub type SharedWriter = Arc<Mutex<dyn fmt::Write + Send>>;

/// Something output can be written to.
#[derive(Clone)]
pub enum WriteTarget {
    /// An in-memory buffer.
    Buffer(OutputBuffer),
    /// An external writer, for example a response stream.
    Writer(SharedWriter),
    /// A stack's proxy writer.
    Proxy(ProxyWriter),
}

impl WriteTarget {
    /// Writes text to the target.
    pub fn write_str(&self, s: &str) -> Result<()> {
        match self {
            WriteTarget::Buffer(buffer) => buffer.write_str(s),
            WriteTarget::Writer(writer) => fmt::Write::write_str(&mut *lock(writer)?, s)
                .map_err(|_| GspError::OutputError("Failed to write to output target".into())),
            WriteTarget::Proxy(proxy) => proxy.write_str(s),
        }
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &WriteTarget) -> bool {
        match (self, other) {
            (WriteTarget::Buffer(a), WriteTarget::Buffer(b)) => a.ptr_eq(b),
            (WriteTarget::Writer(a), WriteTarget::Writer(b)) => Arc::ptr_eq(a, b),
            (WriteTarget::Proxy(a), WriteTarget::Proxy(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for WriteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteTarget::Buffer(_) => f.write_str("WriteTarget::Buffer"),
            WriteTarget::Writer(_) => f.write_str("WriteTarget::Writer"),
            WriteTarget::Proxy(_) => f.write_str("WriteTarget::Proxy"),
        }
    }
}

impl From<OutputBuffer> for WriteTarget {
    fn from(buffer: OutputBuffer) -> Self {
        WriteTarget::Buffer(buffer)
    }
}

/// Writer that forwards to whatever target is on top of its stack.
#[derive(Clone, Default)]
pub struct ProxyWriter {
    delegate: Arc<Mutex<Option<WriteTarget>>>,
}

impl ProxyWriter {
    /// The current delegate.
    pub fn delegate(&self) -> Option<WriteTarget> {
        self.delegate.lock().ok().and_then(|d| d.clone())
    }

    fn set_delegate(&self, target: Option<WriteTarget>) -> Result<()> {
        *lock(&self.delegate)? = target;
        Ok(())
    }

    /// Writes text to the current delegate.
    pub fn write_str(&self, s: &str) -> Result<()> {
        let delegate = lock(&self.delegate)?.clone();
        match delegate {
            Some(target) => target.write_str(s),
            None => Err(GspError::OutputError("No active output target".into())),
        }
    }

    /// True if both handles are the same proxy.
    pub fn ptr_eq(&self, other: &ProxyWriter) -> bool {
        Arc::ptr_eq(&self.delegate, &other.delegate)
    }
}

impl fmt::Debug for ProxyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyWriter").field("delegate", &self.delegate()).finish()
    }
}

/// Externally visible "current writer" of a context.
#[derive(Clone, Default)]
pub struct WriterSlot {
    inner: Arc<Mutex<Option<WriteTarget>>>,
}

impl WriterSlot {
    /// The published writer.
    pub fn get(&self) -> Option<WriteTarget> {
        self.inner.lock().ok().and_then(|w| w.clone())
    }

    fn set(&self, target: Option<WriteTarget>) -> Result<()> {
        *lock(&self.inner)? = target;
        Ok(())
    }
}

/// One stack entry: what was pushed and what is actually written to.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    /// The target as pushed.
    pub original: WriteTarget,
    /// The target writes reach; never the stack's own proxy.
    pub unwrapped: WriteTarget,
}

/// Nested stack of write targets behind one shared proxy writer.
pub struct OutputStack {
    frames: Vec<OutputFrame>,
    proxy: ProxyWriter,
    auto_sync: bool,
    current_writer: WriterSlot,
}

impl OutputStack {
    /// Creates an empty stack publishing to `current_writer`.
    pub fn new(auto_sync: bool, current_writer: WriterSlot) -> Self {
        Self {
            frames: Vec::new(),
            proxy: ProxyWriter::default(),
            auto_sync,
            current_writer,
        }
    }

    /// The shared proxy writer.
    pub fn proxy(&self) -> ProxyWriter {
        self.proxy.clone()
    }

    /// Number of frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The top frame.
    pub fn top(&self) -> Option<&OutputFrame> {
        self.frames.last()
    }

    /// Pushes a target. Pushing this stack's own proxy duplicates the top.
    pub fn push(&mut self, target: WriteTarget) -> Result<()> {
        let unwrapped = match &target {
            WriteTarget::Proxy(proxy) if proxy.ptr_eq(&self.proxy) => self
                .frames
                .last()
                .map(|top| top.unwrapped.clone())
                .ok_or_else(|| GspError::OutputError("Cannot push the proxy writer onto an empty output stack".into()))?,
            WriteTarget::Proxy(foreign) => foreign
                .delegate()
                .ok_or_else(|| GspError::OutputError("Pushed proxy writer has no target".into()))?,
            other => other.clone(),
        };
        self.frames.push(OutputFrame {
            original: target,
            unwrapped,
        });
        self.apply(false)
    }

    /// Pops the top frame, restoring the previous target.
    pub fn pop(&mut self) -> Result<OutputFrame> {
        self.pop_with_sync(false)
    }

    /// Pops the top frame; `force_sync` publishes even without auto-sync.
    pub fn pop_with_sync(&mut self, force_sync: bool) -> Result<OutputFrame> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| GspError::OutputError("Output stack is empty".into()))?;
        self.apply(force_sync)?;
        Ok(frame)
    }

    /// Publishes the active target to the context's current-writer slot.
    pub fn sync(&self) -> Result<()> {
        self.current_writer.set(self.frames.last().map(|f| f.unwrapped.clone()))
    }

    fn apply(&mut self, force_sync: bool) -> Result<()> {
        self.proxy.set_delegate(self.frames.last().map(|f| f.unwrapped.clone()))?;
        if self.auto_sync || force_sync {
            self.sync()?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.frames.clear();
        self.apply(true)
    }
}

/// Per-render output context.
///
/// Cloning shares the context. The stack is torn down by [`cleanup`]
/// or when the last handle is dropped.
///
/// [`cleanup`]: OutputContext::cleanup
#[derive(Clone, Default)]
pub struct OutputContext {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    stack: Mutex<Option<Arc<Mutex<OutputStack>>>>,
    current_writer: WriterSlot,
    captures: Mutex<BTreeMap<String, String>>,
    auto_sync: bool,
}

impl OutputContext {
    /// Creates a context whose stack defers publishing to explicit syncs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose stack republishes on every push and pop.
    pub fn with_auto_sync(auto_sync: bool) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                stack: Mutex::new(None),
                current_writer: WriterSlot::default(),
                captures: Mutex::new(BTreeMap::new()),
                auto_sync,
            }),
        }
    }

    /// The stack, if it has been created.
    pub fn stack(&self) -> Option<Arc<Mutex<OutputStack>>> {
        self.inner.stack.lock().ok().and_then(|s| s.clone())
    }

    /// The stack, created on first use.
    pub fn stack_or_create(&self) -> Result<Arc<Mutex<OutputStack>>> {
        let mut slot = lock(&self.inner.stack)?;
        let stack = slot.get_or_insert_with(|| {
            tracing::trace!("Creating output stack");
            Arc::new(Mutex::new(OutputStack::new(
                self.inner.auto_sync,
                self.inner.current_writer.clone(),
            )))
        });
        Ok(stack.clone())
    }

    /// Current stack depth, `0` when no stack exists.
    pub fn depth(&self) -> usize {
        self.stack()
            .and_then(|s| s.lock().ok().map(|s| s.depth()))
            .unwrap_or(0)
    }

    /// The published current writer.
    pub fn current_writer(&self) -> Option<WriteTarget> {
        self.inner.current_writer.get()
    }

    /// Stores captured layout content under `name`.
    pub fn capture(&self, name: &str, content: String) -> Result<()> {
        lock(&self.inner.captures)?.insert(name.to_string(), content);
        Ok(())
    }

    /// Captured layout content.
    pub fn captured(&self, name: &str) -> Option<String> {
        self.inner.captures.lock().ok().and_then(|c| c.get(name).cloned())
    }

    /// Discards the stack and the published writer.
    pub fn cleanup(&self) -> Result<()> {
        let stack = lock(&self.inner.stack)?.take();
        if let Some(stack) = stack {
            lock(&stack)?.clear()?;
        }
        self.inner.current_writer.set(None)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.stack.lock() {
            if let Some(stack) = slot.take() {
                if let Ok(mut stack) = stack.lock() {
                    let _ = stack.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_target() -> (OutputBuffer, WriteTarget) {
        let buffer = OutputBuffer::new();
        (buffer.clone(), WriteTarget::Buffer(buffer))
    }

    #[test]
    fn proxy_follows_top_of_stack() {
        let mut stack = OutputStack::new(false, WriterSlot::default());
        let (page, page_target) = buffer_target();
        let (body, body_target) = buffer_target();

        stack.push(page_target).unwrap();
        let proxy = stack.proxy();
        proxy.write_str("a").unwrap();

        stack.push(body_target).unwrap();
        proxy.write_str("b").unwrap();
        stack.pop().unwrap();
        proxy.write_str("c").unwrap();

        assert_eq!(page.contents().unwrap(), "ac");
        assert_eq!(body.contents().unwrap(), "b");
    }

    #[test]
    fn pushing_own_proxy_duplicates_top() {
        let mut stack = OutputStack::new(false, WriterSlot::default());
        let (page, page_target) = buffer_target();
        stack.push(page_target).unwrap();

        let proxy = stack.proxy();
        stack.push(WriteTarget::Proxy(proxy.clone())).unwrap();
        assert_eq!(stack.depth(), 2);
        proxy.write_str("x").unwrap();
        assert_eq!(page.contents().unwrap(), "x");

        let frame = stack.pop().unwrap();
        assert!(matches!(frame.original, WriteTarget::Proxy(_)));
        assert!(matches!(frame.unwrapped, WriteTarget::Buffer(_)));
    }

    #[test]
    fn pushing_proxy_onto_empty_stack_fails() {
        let mut stack = OutputStack::new(false, WriterSlot::default());
        let proxy = stack.proxy();
        assert!(stack.push(WriteTarget::Proxy(proxy)).is_err());
    }

    #[test]
    fn pop_on_empty_stack_fails() {
        let mut stack = OutputStack::new(false, WriterSlot::default());
        assert!(stack.pop().is_err());
        assert!(stack.proxy().write_str("x").is_err());
    }

    #[test]
    fn auto_sync_publishes_current_writer() {
        let slot = WriterSlot::default();
        let mut stack = OutputStack::new(true, slot.clone());
        let (_, page_target) = buffer_target();
        let (_, body_target) = buffer_target();

        stack.push(page_target.clone()).unwrap();
        assert!(slot.get().unwrap().same_as(&page_target));
        stack.push(body_target.clone()).unwrap();
        assert!(slot.get().unwrap().same_as(&body_target));
        stack.pop().unwrap();
        assert!(slot.get().unwrap().same_as(&page_target));
    }

    #[test]
    fn manual_sync_defers_publishing() {
        let slot = WriterSlot::default();
        let mut stack = OutputStack::new(false, slot.clone());
        let (_, page_target) = buffer_target();

        stack.push(page_target.clone()).unwrap();
        assert!(slot.get().is_none());
        stack.sync().unwrap();
        assert!(slot.get().unwrap().same_as(&page_target));
    }

    #[test]
    fn nested_pushes_restore_depth() {
        let mut stack = OutputStack::new(false, WriterSlot::default());
        let (_, page_target) = buffer_target();
        stack.push(page_target).unwrap();
        for n in 0..16 {
            let before = stack.depth();
            for _ in 0..n {
                stack.push(WriteTarget::Buffer(OutputBuffer::new())).unwrap();
            }
            for _ in 0..n {
                stack.pop().unwrap();
            }
            assert_eq!(stack.depth(), before);
        }
    }

    #[test]
    fn context_creates_stack_lazily_and_cleans_up() {
        let ctx = OutputContext::with_auto_sync(true);
        assert!(ctx.stack().is_none());
        assert_eq!(ctx.depth(), 0);

        let stack = ctx.stack_or_create().unwrap();
        let again = ctx.stack_or_create().unwrap();
        assert!(Arc::ptr_eq(&stack, &again));

        stack.lock().unwrap().push(WriteTarget::Buffer(OutputBuffer::new())).unwrap();
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.current_writer().is_some());

        ctx.cleanup().unwrap();
        assert!(ctx.stack().is_none());
        assert!(ctx.current_writer().is_none());
        assert_eq!(stack.lock().unwrap().depth(), 0);
    }

    #[test]
    fn external_writer_target() {
        let sink: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let writer: SharedWriter = sink.clone();
        let mut stack = OutputStack::new(false, WriterSlot::default());
        stack.push(WriteTarget::Writer(writer)).unwrap();
        stack.proxy().write_str("hello").unwrap();
        assert_eq!(sink.lock().unwrap().as_str(), "hello");
    }
}
