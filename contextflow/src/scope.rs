//! Optional scope activation around contextualized task execution.
//!
//! Some context kinds are not simple values but scopes with their own
//! lifecycle — a request scope that must be activated on the worker thread
//! after context is applied and deactivated before it is reverted. Scope
//! activation is optional: a [`ScopeActivator`] may report that the scope is
//! unavailable, and a deactivation that finds the scope already torn down
//! (application shutdown racing with task completion) is swallowed rather
//! than surfaced.

use thiserror::Error;

/// Failure modes of scope deactivation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// The scope was already inactive when deactivation ran. This is a
    /// benign race with scope teardown and is swallowed by callers.
    #[error("scope was already inactive")]
    AlreadyInactive,

    /// Any other deactivation failure. Logged as a warning; never masks
    /// the task's own result.
    #[error("scope deactivation failed: {0}")]
    Failure(String),
}

/// The result of attempting to activate a scope.
pub enum Activation {
    /// The scope is now active; deactivate it via the returned handle.
    Activated(Box<dyn ActiveScope>),
    /// The scope facility is not available here; nothing to deactivate.
    Unavailable,
    /// Activation itself failed.
    Failed(ScopeError),
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activated(_) => f.write_str("Activated"),
            Self::Unavailable => f.write_str("Unavailable"),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// Activates an optional scope on the executing thread.
pub trait ScopeActivator: Send + Sync {
    /// Attempts to activate the scope on the current thread.
    fn activate(&self) -> Activation;
}

/// A scope that was activated and must be deactivated exactly once.
pub trait ActiveScope {
    /// Deactivates the scope on the current thread.
    fn deactivate(self: Box<Self>) -> Result<(), ScopeError>;
}
