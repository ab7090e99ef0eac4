//! Invocation context: the call-stack of one call chain.
//!
//! A context is confined to one thread of control at a time. Synchronous
//! contexts live in the thread-bound slot managed by
//! [`context_util`](crate::context_util); asynchronous contexts are owned values
//! the caller attaches around each piece of work and detaches afterwards.

use crate::entry::{
    ChainRef, Entry, EntryId, ExitOutcome, ResourceWrapper, TerminationHandler,
};
use crate::error::EntryError;
use crate::stats::{ManualStatistics, NodeRef};
use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Name of the context created implicitly when a resource is entered without one.
pub const DEFAULT_CONTEXT_NAME: &str = "flowgate_default_context";

/// Name of the no-op context handed out once too many context names exist.
pub const NULL_CONTEXT_NAME: &str = "null_context_internal";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How a context came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Created explicitly by the caller.
    Named,
    /// Created implicitly on first entry; released when its outermost entry exits.
    Default,
    /// No-op context: entries are inert and exits do nothing.
    Null,
}

struct Frame {
    id: EntryId,
    resource: ResourceWrapper,
    chain: Option<ChainRef>,
    handlers: Vec<TerminationHandler>,
    cur_node: Option<NodeRef>,
    origin_node: Option<NodeRef>,
    exited: Arc<AtomicBool>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[derive(Debug)]
pub struct InvocationContext {
    id: u64,
    name: String,
    entrance: NodeRef,
    stack: Vec<Frame>,
    origin: String,
    is_async: bool,
    kind: ContextKind,
}

impl InvocationContext {
    fn build(name: String, entrance: NodeRef, is_async: bool, kind: ContextKind) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            entrance,
            stack: Vec::new(),
            origin: String::new(),
            is_async,
            kind,
        }
    }

    /// Create a synchronous context rooted at `entrance`.
    pub fn new(name: impl Into<String>, entrance: NodeRef) -> Self {
        Self::build(name.into(), entrance, false, ContextKind::Named)
    }

    /// Create an asynchronous context. It is never released automatically.
    pub fn new_async(name: impl Into<String>, entrance: NodeRef) -> Self {
        Self::build(name.into(), entrance, true, ContextKind::Named)
    }

    /// Create a no-op context.
    pub fn null() -> Self {
        Self::build(
            NULL_CONTEXT_NAME.to_string(),
            Arc::new(ManualStatistics::default()),
            false,
            ContextKind::Null,
        )
    }

    pub(crate) fn implicit_default(entrance: NodeRef) -> Self {
        Self::build(DEFAULT_CONTEXT_NAME.to_string(), entrance, false, ContextKind::Default)
    }

    /// Set the caller identity used for per-origin accounting.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Root of this chain's invocation tree.
    pub fn entrance_node(&self) -> &NodeRef {
        &self.entrance
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = origin.into();
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn is_null(&self) -> bool {
        self.kind == ContextKind::Null
    }

    /// Whether this is the implicitly created default context.
    pub fn is_default(&self) -> bool {
        self.kind == ContextKind::Default
    }

    /// Resource of the current (innermost) entry.
    pub fn current_entry(&self) -> Option<&ResourceWrapper> {
        self.stack.last().map(|frame| &frame.resource)
    }

    pub fn current_entry_id(&self) -> Option<EntryId> {
        self.stack.last().map(|frame| frame.id)
    }

    /// Number of active entries.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Statistics node of the current entry.
    pub fn cur_node(&self) -> Option<NodeRef> {
        self.stack.last().and_then(|frame| frame.cur_node.clone())
    }

    /// Attach `node` to the current entry. Returns `false` when there is none.
    pub fn set_cur_node(&mut self, node: NodeRef) -> bool {
        match self.stack.last_mut() {
            Some(frame) => {
                frame.cur_node = Some(node);
                true
            }
            None => false,
        }
    }

    /// Per-origin statistics node of the current entry.
    ///
    /// Set by the processing chain when the context carries an origin; `None`
    /// otherwise.
    pub fn origin_node(&self) -> Option<NodeRef> {
        self.stack.last().and_then(|frame| frame.origin_node.clone())
    }

    /// Node of the current entry's caller, falling back to the entrance node.
    pub fn last_node(&self) -> NodeRef {
        let len = self.stack.len();
        if len >= 2 {
            if let Some(node) = &self.stack[len - 2].cur_node {
                return node.clone();
            }
        }
        self.entrance.clone()
    }

    /// Push a new entry for `resource`; it becomes the current entry.
    ///
    /// On the null context the entry is inert and the stack is untouched.
    pub fn enter(&mut self, resource: ResourceWrapper, chain: Option<ChainRef>) -> Entry {
        let id = EntryId::next();
        let exited = Arc::new(AtomicBool::new(false));
        if self.is_null() {
            return Entry::new(id, resource, None, exited);
        }

        tracing::trace!(context = %self.name, resource = %resource, depth = self.stack.len() + 1, "Entry created");
        self.stack.push(Frame {
            id,
            resource: resource.clone(),
            chain,
            handlers: Vec::new(),
            cur_node: None,
            origin_node: None,
            exited: exited.clone(),
        });
        Entry::new(id, resource, Some(self.id), exited)
    }

    pub(crate) fn exit_entry(
        &mut self,
        id: EntryId,
        count: u32,
        args: &[&dyn Any],
    ) -> Result<ExitOutcome, EntryError> {
        if self.is_null() {
            return Ok(ExitOutcome::noop());
        }
        let Some(position) = self.position(id) else {
            return Ok(ExitOutcome::noop());
        };

        if position + 1 == self.stack.len() {
            return Ok(self.exit_current(count, args));
        }

        let expected = self.stack[position].resource.name().to_string();
        let current = self.current_entry().map(|resource| resource.name().to_string());
        tracing::error!(
            context = %self.name,
            expected = %expected,
            current = current.as_deref().unwrap_or("none"),
            pending = self.stack.len(),
            "Entry exited out of order; unwinding call stack"
        );
        while !self.stack.is_empty() {
            self.exit_current(count, args);
        }
        Err(EntryError::OutOfOrderExit { current, expected })
    }

    /// Exit the top frame: chain, then handlers, then restore the parent.
    fn exit_current(&mut self, count: u32, args: &[&dyn Any]) -> ExitOutcome {
        let (resource, chain, handlers) = match self.stack.last_mut() {
            Some(frame) => {
                (frame.resource.clone(), frame.chain.take(), mem::take(&mut frame.handlers))
            }
            None => return ExitOutcome::noop(),
        };

        // A panicking chain must not leave a half-exited frame behind.
        let notified = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Some(chain) = chain {
                chain.exit(self, &resource, count, args);
            }
        }));
        self.run_termination_handlers(&resource, handlers);

        if let Some(frame) = self.stack.pop() {
            frame.exited.store(true, Ordering::Release);
        }
        if let Err(payload) = notified {
            tracing::error!(context = %self.name, resource = %resource, "Processing chain panicked on exit");
            panic::resume_unwind(payload);
        }
        let parent = self.current_entry().cloned();
        let root_exited = parent.is_none();
        tracing::trace!(context = %self.name, resource = %resource, root_exited, "Entry exited");
        ExitOutcome { parent, root_exited, noop: false }
    }

    fn run_termination_handlers(&self, resource: &ResourceWrapper, handlers: Vec<TerminationHandler>) {
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(self, resource))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(resource = %resource, error = %error, "Entry termination handler failed");
                }
                Err(_) => {
                    tracing::warn!(resource = %resource, "Entry termination handler panicked");
                }
            }
        }
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        self.stack.iter().rposition(|frame| frame.id == id)
    }

    pub(crate) fn add_termination_handler(&mut self, id: EntryId, handler: TerminationHandler) -> bool {
        match self.position(id) {
            Some(position) => {
                self.stack[position].handlers.push(handler);
                true
            }
            None => false,
        }
    }

    pub(crate) fn frame_node(&self, id: EntryId) -> Option<NodeRef> {
        self.position(id).and_then(|position| self.stack[position].cur_node.clone())
    }

    pub(crate) fn set_frame_node(&mut self, id: EntryId, node: NodeRef) -> bool {
        match self.position(id) {
            Some(position) => {
                self.stack[position].cur_node = Some(node);
                true
            }
            None => false,
        }
    }

    pub(crate) fn frame_origin_node(&self, id: EntryId) -> Option<NodeRef> {
        self.position(id).and_then(|position| self.stack[position].origin_node.clone())
    }

    pub(crate) fn set_frame_origin_node(&mut self, id: EntryId, node: NodeRef) -> bool {
        match self.position(id) {
            Some(position) => {
                self.stack[position].origin_node = Some(node);
                true
            }
            None => false,
        }
    }

    pub(crate) fn frame_last_node(&self, id: EntryId) -> Option<NodeRef> {
        match self.position(id)? {
            0 => Some(self.entrance.clone()),
            position => self.stack[position - 1].cur_node.clone(),
        }
    }
}
