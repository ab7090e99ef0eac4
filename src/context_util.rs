//! Thread-bound context slot.
//!
//! Each thread holds at most one [`InvocationContext`]. [`entry`] creates the
//! implicit default context on demand and [`exit_entry`] releases it when its
//! outermost entry exits. Named contexts are bound with [`enter`] and released
//! with [`exit`]. Asynchronous contexts are never released automatically:
//! attach one with [`replace_context`] or [`run_on_context`] before resuming
//! work on a thread and detach it with [`take_context`] afterwards.
//!
//! Processing chains and termination handlers receive the context by reference
//! and should use it directly. Called from one of them during [`exit_entry`],
//! the functions here find the slot busy: [`entry`] hands out an inert entry,
//! [`enter`] and [`exit_entry`] return an error and the rest do nothing. The
//! attach and detach functions panic instead.

use crate::context::{InvocationContext, DEFAULT_CONTEXT_NAME};
use crate::entry::{ChainRef, Entry, ExitOutcome, ResourceWrapper};
use crate::error::{ContextError, EntryError};
use crate::stats::{ManualStatistics, NodeRef};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Maximum number of distinct context names. Further names get the null context.
pub const MAX_CONTEXT_NAME_SIZE: usize = 2000;

thread_local! {
    static CURRENT: RefCell<Option<InvocationContext>> = const { RefCell::new(None) };
}

static ENTRANCE_NODES: OnceLock<Mutex<EntranceRegistry>> = OnceLock::new();

/// Entrance nodes by context name.
///
/// The implicit default context is registered up front and never counts toward
/// the name limit.
#[derive(Debug)]
struct EntranceRegistry {
    nodes: HashMap<String, NodeRef>,
    limit: usize,
}

impl EntranceRegistry {
    fn new(limit: usize) -> Self {
        let mut nodes = HashMap::new();
        let default_node: NodeRef = Arc::new(ManualStatistics::default());
        nodes.insert(DEFAULT_CONTEXT_NAME.to_string(), default_node);
        Self { nodes, limit }
    }

    /// Names counted against the limit.
    fn named(&self) -> usize {
        self.nodes.len() - usize::from(self.nodes.contains_key(DEFAULT_CONTEXT_NAME))
    }

    fn is_full_for(&self, name: &str) -> bool {
        name != DEFAULT_CONTEXT_NAME && !self.nodes.contains_key(name) && self.named() >= self.limit
    }

    /// Entrance node shared by every context named `name`, created on first use.
    fn node_for(&mut self, name: &str) -> Option<NodeRef> {
        if let Some(node) = self.nodes.get(name) {
            return Some(node.clone());
        }
        if self.is_full_for(name) {
            tracing::warn!(
                context = name,
                max = self.limit,
                "Context name limit reached; using the null context"
            );
            return None;
        }
        let node: NodeRef = Arc::new(ManualStatistics::default());
        self.nodes.insert(name.to_string(), node.clone());
        Some(node)
    }

    fn register(&mut self, name: String, node: NodeRef) -> bool {
        if self.is_full_for(&name) {
            return false;
        }
        self.nodes.insert(name, node);
        true
    }

    fn default_node(&mut self) -> NodeRef {
        self.nodes
            .entry(DEFAULT_CONTEXT_NAME.to_string())
            .or_insert_with(|| Arc::new(ManualStatistics::default()))
            .clone()
    }
}

fn entrance_nodes() -> MutexGuard<'static, EntranceRegistry> {
    ENTRANCE_NODES
        .get_or_init(|| Mutex::new(EntranceRegistry::new(MAX_CONTEXT_NAME_SIZE)))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Use `node` as the entrance node for contexts named `name`.
///
/// Lets the host plug in its own statistics engine. Returns `false` if the name
/// limit is reached. The default context name is always accepted.
pub fn register_entrance_node(name: impl Into<String>, node: NodeRef) -> bool {
    entrance_nodes().register(name.into(), node)
}

/// Number of distinct explicit context names seen so far.
pub fn entrance_node_count() -> usize {
    entrance_nodes().named()
}

fn new_context(name: &str, origin: &str) -> InvocationContext {
    match entrance_nodes().node_for(name) {
        Some(node) => InvocationContext::new(name, node).with_origin(origin),
        None => InvocationContext::null(),
    }
}

/// Run `f` on this thread's slot unless it is already borrowed, which happens
/// when a processing chain or handler calls back in during an exit.
fn with_slot<R>(f: impl FnOnce(&mut Option<InvocationContext>) -> R) -> Option<R> {
    CURRENT.with(|slot| match slot.try_borrow_mut() {
        Ok(mut slot) => Some(f(&mut slot)),
        Err(_) => {
            tracing::warn!("Thread-bound context is busy exiting an entry; call ignored");
            None
        }
    })
}

/// Bind a context named `name` to this thread unless one is already bound.
///
/// An already bound context is kept as is, origin included.
pub fn enter(name: &str, origin: &str) -> Result<(), ContextError> {
    if name == DEFAULT_CONTEXT_NAME {
        return Err(ContextError::ReservedName(name.to_string()));
    }
    with_slot(|slot| {
        if slot.is_none() {
            *slot = Some(new_context(name, origin));
        }
    })
    .ok_or(ContextError::Busy)
}

/// Release the bound context if it has no active entry.
pub fn exit() {
    with_slot(|slot| {
        if slot.as_ref().is_some_and(|ctx| ctx.current_entry().is_none()) {
            *slot = None;
        }
    });
}

/// Enter `resource` on the bound context, creating the implicit default context
/// when none is bound.
///
/// Returns an inert entry when called while the bound context is exiting an entry.
pub fn entry(resource: ResourceWrapper, chain: Option<ChainRef>) -> Entry {
    CURRENT.with(|slot| match slot.try_borrow_mut() {
        Ok(mut slot) => slot
            .get_or_insert_with(|| InvocationContext::implicit_default(entrance_nodes().default_node()))
            .enter(resource, chain),
        Err(_) => {
            tracing::warn!(resource = %resource, "Thread-bound context is busy exiting an entry; entry is inert");
            InvocationContext::null().enter(resource, None)
        }
    })
}

/// Exit `entry` through the bound context.
///
/// Releases the implicit default context once it has no active entry, including
/// after an out-of-order exit unwound it.
pub fn exit_entry(entry: &mut Entry, count: u32, args: &[&dyn Any]) -> Result<ExitOutcome, EntryError> {
    if entry.is_inert() || entry.is_exited() {
        return Ok(ExitOutcome::noop());
    }
    CURRENT.with(|slot| {
        let Ok(mut slot) = slot.try_borrow_mut() else {
            return Err(EntryError::ContextBusy { resource: entry.resource().name().to_string() });
        };
        let Some(ctx) = slot.as_mut() else {
            return Err(EntryError::ForeignContext {
                resource: entry.resource().name().to_string(),
                context: String::from("<unbound>"),
            });
        };
        let result = entry.exit(ctx, count, args);
        if ctx.is_default() && ctx.depth() == 0 {
            *slot = None;
        }
        result
    })
}

/// Run `f` with the bound context, if any.
pub fn with_context<R>(f: impl FnOnce(&mut InvocationContext) -> R) -> Option<R> {
    with_slot(|slot| slot.as_mut().map(f)).flatten()
}

/// Name of the bound context, if any.
pub fn context_name() -> Option<String> {
    with_context(|ctx| ctx.name().to_string())
}

/// Bind `ctx` to this thread, returning whatever was bound before.
///
/// # Panics
///
/// Panics if called while [`exit_entry`] is running on this thread.
pub fn replace_context(ctx: Option<InvocationContext>) -> Option<InvocationContext> {
    CURRENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), ctx))
}

/// Detach and return the bound context.
pub fn take_context() -> Option<InvocationContext> {
    replace_context(None)
}

/// Bind `ctx` for the duration of `f`, then restore the previous binding.
///
/// Returns `f`'s result and the context as `f` left it; the context is `None`
/// when `f` released it.
pub fn run_on_context<R>(ctx: InvocationContext, f: impl FnOnce() -> R) -> (R, Option<InvocationContext>) {
    struct Restore(Option<Option<InvocationContext>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                replace_context(previous);
            }
        }
    }

    let mut restore = Restore(Some(replace_context(Some(ctx))));
    let result = f();
    let ctx = take_context();
    if let Some(previous) = restore.0.take() {
        replace_context(previous);
    }
    (result, ctx)
}
