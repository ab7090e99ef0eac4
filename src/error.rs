//! Error types for controllers, the entry call-stack and the tower gate.

use thiserror::Error;

/// Failure reported by a termination handler. Logged and skipped on exit.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration errors raised while building a controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapingError {
    /// Warm-up needs a cold interval strictly longer than the stable one.
    #[error("cold factor must be larger than 1 (got {provided})")]
    InvalidColdFactor {
        /// Value provided by caller.
        provided: i32,
    },
    /// Control behavior code outside the known set.
    #[error("unknown control behavior code {0}")]
    UnknownBehavior(i32),
}

/// Protocol violations in the entry call-stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    /// An entry was exited while a different entry was current in its context.
    ///
    /// Raised after every pending entry of the context has been force-exited.
    #[error(
        "entry exit order mismatch: current entry in context is <{}>, but expected <{expected}>",
        .current.as_deref().unwrap_or("none")
    )]
    OutOfOrderExit {
        /// Resource that was current when the violation was detected.
        current: Option<String>,
        /// Resource of the entry the caller tried to exit.
        expected: String,
    },
    /// An entry was exited through a context other than the one it was created in.
    #[error("entry <{resource}> does not belong to context <{context}>")]
    ForeignContext {
        /// Resource of the entry the caller tried to exit.
        resource: String,
        /// Name of the context it was exited through.
        context: String,
    },
    /// The thread-bound context was already busy exiting another entry.
    #[error("entry <{resource}> exited while the thread-bound context was busy")]
    ContextBusy {
        /// Resource of the entry the caller tried to exit.
        resource: String,
    },
}

impl EntryError {
    /// Resource name of the entry the caller tried to exit.
    pub fn expected(&self) -> &str {
        match self {
            Self::OutOfOrderExit { expected, .. } => expected,
            Self::ForeignContext { resource, .. } | Self::ContextBusy { resource } => resource,
        }
    }

    /// Resource name that was current in the context at exit time.
    pub fn current(&self) -> Option<&str> {
        match self {
            Self::OutOfOrderExit { current, .. } => current.as_deref(),
            Self::ForeignContext { .. } | Self::ContextBusy { .. } => None,
        }
    }

    /// Check if this error reports exits in the wrong order.
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, Self::OutOfOrderExit { .. })
    }
}

/// Errors raised when binding a context to the current thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The default context name is reserved for implicitly created contexts.
    #[error("context name <{0}> is reserved for the implicit default context")]
    ReservedName(String),
    /// The thread-bound slot is in use by an exit in progress.
    #[error("thread-bound context is busy exiting an entry")]
    Busy,
}

/// Error returned by [`ShapingService`](crate::middleware::ShapingService).
#[derive(Debug, Clone, Error)]
pub enum GateError<E> {
    /// The controller refused admission.
    #[error("request blocked by flow control on resource {resource}")]
    Blocked {
        /// Resource the gate protects.
        resource: String,
    },
    /// The wrapped service failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> GateError<E> {
    /// Check if the request was refused admission.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
