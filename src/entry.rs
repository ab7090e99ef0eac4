//! Entries: one active invocation of a protected resource.
//!
//! An [`Entry`] is the caller's ticket for an invocation pushed onto an
//! [`InvocationContext`]. The context owns the call-stack itself (processing
//! chain, termination handlers, statistics node); the ticket only identifies its
//! frame and remembers whether that frame has been exited, so a second exit is a
//! no-op even when the frame was force-unwound on the caller's behalf.
//!
//! ```
//! use flowgate::{InvocationContext, ManualStatistics, ResourceWrapper};
//! use std::sync::Arc;
//!
//! let mut ctx = InvocationContext::new("web", Arc::new(ManualStatistics::default()));
//! let mut outer = ctx.enter(ResourceWrapper::inbound("GET /orders"), None);
//! let mut inner = ctx.enter(ResourceWrapper::outbound("db.query"), None);
//! inner.exit(&mut ctx, 1, &[]).unwrap();
//! outer.exit(&mut ctx, 1, &[]).unwrap();
//! assert!(ctx.current_entry().is_none());
//! ```

use crate::context::InvocationContext;
use crate::error::{EntryError, HandlerError};
use crate::stats::NodeRef;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Traffic direction of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Inbound traffic served by this process.
    In,
    /// Outbound calls made by this process.
    Out,
}

/// Identity of a protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceWrapper {
    name: String,
    entry_type: EntryType,
}

impl ResourceWrapper {
    pub fn new(name: impl Into<String>, entry_type: EntryType) -> Self {
        Self { name: name.into(), entry_type }
    }

    pub fn inbound(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::In)
    }

    pub fn outbound(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::Out)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }
}

impl fmt::Display for ResourceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ordered processing stages notified when an entry exits.
///
/// Failures inside the chain are the chain's own business; `exit` cannot fail.
pub trait ProcessorChain: Send + Sync + fmt::Debug {
    fn exit(&self, ctx: &InvocationContext, resource: &ResourceWrapper, count: u32, args: &[&dyn Any]);
}

/// Shared handle to a processing chain.
pub type ChainRef = Arc<dyn ProcessorChain>;

/// Callback run once when its entry exits, after the processing chain.
pub type TerminationHandler =
    Box<dyn FnOnce(&InvocationContext, &ResourceWrapper) -> Result<(), HandlerError> + Send>;

/// Identifier of an entry, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) fn next() -> Self {
        EntryId(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What an exit did to the call-stack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    /// Resource of the entry that became current, if any.
    pub parent: Option<ResourceWrapper>,
    /// The outermost entry of the context exited.
    pub root_exited: bool,
    /// Nothing happened: the entry was inert or had already exited.
    pub noop: bool,
}

impl ExitOutcome {
    pub(crate) fn noop() -> Self {
        Self { parent: None, root_exited: false, noop: true }
    }
}

/// Caller-held ticket for one invocation.
#[derive(Debug)]
pub struct Entry {
    id: EntryId,
    resource: ResourceWrapper,
    context_id: Option<u64>,
    exited: Arc<AtomicBool>,
}

impl Entry {
    pub(crate) fn new(
        id: EntryId,
        resource: ResourceWrapper,
        context_id: Option<u64>,
        exited: Arc<AtomicBool>,
    ) -> Self {
        Self { id, resource, context_id, exited }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn resource(&self) -> &ResourceWrapper {
        &self.resource
    }

    /// Entries created on the null context never join a call-stack.
    pub fn is_inert(&self) -> bool {
        self.context_id.is_none()
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Exit this entry from `ctx`.
    ///
    /// When the entry is not current in its context every pending entry of that
    /// context is exited first, newest to oldest, and then
    /// [`EntryError::OutOfOrderExit`] is returned.
    ///
    /// Exiting an inert or already exited entry does nothing.
    pub fn exit(
        &mut self,
        ctx: &mut InvocationContext,
        count: u32,
        args: &[&dyn Any],
    ) -> Result<ExitOutcome, EntryError> {
        if self.is_exited() {
            return Ok(ExitOutcome::noop());
        }
        let Some(context_id) = self.context_id else {
            return Ok(ExitOutcome::noop());
        };
        if context_id != ctx.id() {
            return Err(EntryError::ForeignContext {
                resource: self.resource.name().to_string(),
                context: ctx.name().to_string(),
            });
        }
        ctx.exit_entry(self.id, count, args)
    }

    /// Register `handler` to run when this entry exits.
    ///
    /// Returns `false`, dropping the handler, if the entry is inert, already
    /// exited, or not part of `ctx`.
    pub fn when_terminate<F>(&self, ctx: &mut InvocationContext, handler: F) -> bool
    where
        F: FnOnce(&InvocationContext, &ResourceWrapper) -> Result<(), HandlerError> + Send + 'static,
    {
        if self.is_exited() || self.context_id != Some(ctx.id()) {
            return false;
        }
        ctx.add_termination_handler(self.id, Box::new(handler))
    }

    /// Statistics node attached to this entry by the processing chain.
    pub fn cur_node(&self, ctx: &InvocationContext) -> Option<NodeRef> {
        if self.context_id != Some(ctx.id()) {
            return None;
        }
        ctx.frame_node(self.id)
    }

    pub fn set_cur_node(&self, ctx: &mut InvocationContext, node: NodeRef) -> bool {
        if self.context_id != Some(ctx.id()) {
            return false;
        }
        ctx.set_frame_node(self.id, node)
    }

    /// Per-origin statistics node attached to this entry by the processing chain.
    pub fn origin_node(&self, ctx: &InvocationContext) -> Option<NodeRef> {
        if self.context_id != Some(ctx.id()) {
            return None;
        }
        ctx.frame_origin_node(self.id)
    }

    pub fn set_origin_node(&self, ctx: &mut InvocationContext, node: NodeRef) -> bool {
        if self.context_id != Some(ctx.id()) {
            return false;
        }
        ctx.set_frame_origin_node(self.id, node)
    }

    /// Node of the caller in the invocation tree: the parent entry's node, or the
    /// context's entrance node for the outermost entry.
    pub fn last_node(&self, ctx: &InvocationContext) -> Option<NodeRef> {
        if self.context_id != Some(ctx.id()) {
            return None;
        }
        ctx.frame_last_node(self.id)
    }
}
