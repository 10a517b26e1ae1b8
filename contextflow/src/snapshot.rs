//! Immutable context snapshots and their apply/revert lifecycle.
//!
//! A [`ContextSnapshot`] is a point-in-time capture of a set of ambient
//! context values, taken on one thread and applied on another. Snapshots are
//! immutable and cheaply cloneable; the same snapshot may be applied
//! concurrently on many threads. All mutable "what do I need to undo"
//! bookkeeping lives in the per-apply [`AppliedContextHandle`].
//!
//! # Stack discipline
//!
//! Applies on a single thread nest like a stack: the innermost un-reverted
//! apply must be reverted first, so a thread's ambient context is always
//! restored to exactly what it was immediately before each apply. The stack
//! is modeled explicitly as a thread-local list of apply ids rather than
//! relying on call-stack nesting, which makes the ordering invariant
//! checkable: an out-of-order revert fails with
//! [`MisuseError::OutOfOrderRevert`] instead of silently corrupting the
//! thread's state.
//!
//! Handles are deliberately not `Send`: a revert can only happen on the
//! thread that performed the apply, and the compiler enforces it.

use crate::config::Disposition;
use crate::errors::{MisuseError, MisuseResult};
use crate::provider::{CapturedContext, RestoredContext};
use crate::scope::{Activation, ActiveScope, ScopeActivator, ScopeError};
use crate::types::{ContextKind, SnapshotId, Timestamp};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// One captured kind and its disposition inside a snapshot.
pub(crate) enum SnapshotEntry {
    /// Reapply the captured submitting-thread value.
    Propagate {
        /// The kind this value belongs to.
        kind: ContextKind,
        /// The captured value, shared across concurrent applies.
        value: Arc<dyn CapturedContext>,
    },
    /// Establish the provider's default value.
    Clear {
        /// The kind being reset.
        kind: ContextKind,
        /// The provider's default, shared across concurrent applies.
        default: Arc<dyn CapturedContext>,
    },
    /// Leave the executing thread's own value alone.
    Unchanged {
        /// The kind being left as-is.
        kind: ContextKind,
    },
}

impl SnapshotEntry {
    const fn kind(&self) -> &ContextKind {
        match self {
            Self::Propagate { kind, .. } | Self::Clear { kind, .. } | Self::Unchanged { kind } => {
                kind
            }
        }
    }

    const fn disposition(&self) -> Disposition {
        match self {
            Self::Propagate { .. } => Disposition::Propagated,
            Self::Clear { .. } => Disposition::Cleared,
            Self::Unchanged { .. } => Disposition::Unchanged,
        }
    }
}

static NEXT_APPLY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Ids of the un-reverted applies on this thread, innermost last.
    static APPLY_STACK: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// An immutable capture of ambient context, safe to reapply later and
/// elsewhere.
///
/// Created by [`ContextService::capture`](crate::service::ContextService::capture);
/// consumed, possibly many times and concurrently, by [`apply`](Self::apply)
/// and [`run_with_context`](Self::run_with_context). Never mutated after
/// creation.
#[derive(Clone)]
pub struct ContextSnapshot {
    id: SnapshotId,
    captured_at: Timestamp,
    entries: Arc<Vec<SnapshotEntry>>,
}

impl ContextSnapshot {
    pub(crate) fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self {
            id: SnapshotId::new(),
            captured_at: Timestamp::now(),
            entries: Arc::new(entries),
        }
    }

    /// The unique, time-ordered identity of this capture.
    pub const fn id(&self) -> SnapshotId {
        self.id
    }

    /// When this snapshot was captured.
    pub const fn captured_at(&self) -> Timestamp {
        self.captured_at
    }

    /// The kinds this snapshot covers and their dispositions, in apply order.
    pub fn dispositions(&self) -> impl Iterator<Item = (&ContextKind, Disposition)> {
        self.entries
            .iter()
            .map(|entry| (entry.kind(), entry.disposition()))
    }

    /// Establishes this snapshot's context on the current thread.
    ///
    /// Propagated values and cleared defaults are applied in entry order;
    /// unchanged entries touch nothing. The same snapshot may be applied
    /// concurrently on different threads; each apply yields an independent
    /// handle.
    ///
    /// Every apply must be paired with exactly one
    /// [`revert`](AppliedContextHandle::revert) on the same thread.
    pub fn apply(&self) -> AppliedContextHandle {
        let apply_id = NEXT_APPLY_ID.fetch_add(1, Ordering::Relaxed);
        let mut restorers = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter() {
            match entry {
                SnapshotEntry::Propagate { value, .. } => restorers.push(value.apply()),
                SnapshotEntry::Clear { default, .. } => restorers.push(default.apply()),
                SnapshotEntry::Unchanged { .. } => {}
            }
        }
        APPLY_STACK.with(|stack| stack.borrow_mut().push(apply_id));
        AppliedContextHandle {
            apply_id,
            restorers,
            reverted: false,
            _not_send: PhantomData,
        }
    }

    /// Runs `task` with this snapshot's context established, reverting on
    /// every exit path.
    ///
    /// The task's panic, if any, is re-raised after the revert completes, so
    /// a pooled worker thread never unwinds with foreign context still
    /// applied.
    ///
    /// # Panics
    ///
    /// Panics if the revert itself fails, which can only happen when the
    /// task smuggles an un-reverted inner apply out through its return
    /// value. That is a misuse, and it fails fast rather than leaving the
    /// worker thread with foreign context.
    pub fn run_with_context<T>(&self, task: impl FnOnce() -> T) -> T {
        let mut handle = self.apply();
        let outcome = catch_unwind(AssertUnwindSafe(task));
        if let Err(err) = handle.revert() {
            panic!("context revert after task did not match apply: {err}");
        }
        match outcome {
            Ok(value) => value,
            Err(panic) => resume_unwind(panic),
        }
    }

    /// Like [`run_with_context`](Self::run_with_context), additionally
    /// activating an optional scope after apply and deactivating it before
    /// revert.
    ///
    /// A deactivation that finds the scope already inactive is swallowed;
    /// the scope may have been torn down concurrently by application
    /// shutdown. Any other deactivation failure is logged as a warning and
    /// never masks the task's own outcome.
    ///
    /// # Panics
    ///
    /// As for [`run_with_context`](Self::run_with_context): a revert that no
    /// longer matches the apply is a misuse and fails fast.
    pub fn run_in_scope<T>(&self, activator: &dyn ScopeActivator, task: impl FnOnce() -> T) -> T {
        let mut handle = self.apply();
        let scope = self.activate(activator);
        let outcome = catch_unwind(AssertUnwindSafe(task));
        Self::deactivate(scope);
        if let Err(err) = handle.revert() {
            panic!("context revert after task did not match apply: {err}");
        }
        match outcome {
            Ok(value) => value,
            Err(panic) => resume_unwind(panic),
        }
    }

    fn activate(&self, activator: &dyn ScopeActivator) -> Option<Box<dyn ActiveScope>> {
        match activator.activate() {
            Activation::Activated(scope) => Some(scope),
            Activation::Unavailable => None,
            Activation::Failed(err) => {
                warn!(error = %err, snapshot_id = %self.id, "scope activation failed; running task without scope");
                None
            }
        }
    }

    fn deactivate(scope: Option<Box<dyn ActiveScope>>) {
        if let Some(scope) = scope {
            match scope.deactivate() {
                Ok(()) | Err(ScopeError::AlreadyInactive) => {}
                Err(err) => warn!(error = %err, "scope deactivation failed"),
            }
        }
    }
}

impl std::fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSnapshot")
            .field("id", &self.id)
            .field("captured_at", &self.captured_at)
            .field(
                "kinds",
                &self.dispositions().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// The per-apply undo record for one thread.
///
/// One handle exists per [`ContextSnapshot::apply`] call; it is discarded
/// after the matching [`revert`](Self::revert). Handles are not `Send`:
/// reverting on a different thread than the apply is a compile error.
pub struct AppliedContextHandle {
    apply_id: u64,
    restorers: Vec<Box<dyn RestoredContext>>,
    reverted: bool,
    // Pins the handle to the applying thread.
    _not_send: PhantomData<*const ()>,
}

impl AppliedContextHandle {
    /// Restores the thread's pre-apply value for every kind the matching
    /// apply touched, in reverse apply order.
    ///
    /// Fails with [`MisuseError::DoubleRevert`] if this handle was already
    /// reverted (the first revert's effects remain intact), and with
    /// [`MisuseError::OutOfOrderRevert`] if an inner apply on this thread
    /// has not been reverted yet.
    pub fn revert(&mut self) -> MisuseResult<()> {
        if self.reverted {
            return Err(MisuseError::DoubleRevert);
        }
        let is_innermost =
            APPLY_STACK.with(|stack| stack.borrow().last() == Some(&self.apply_id));
        if !is_innermost {
            return Err(MisuseError::OutOfOrderRevert);
        }
        APPLY_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
        self.reverted = true;
        for restorer in self.restorers.drain(..).rev() {
            restorer.restore();
        }
        Ok(())
    }
}

impl Drop for AppliedContextHandle {
    /// Safety net: a handle dropped without an explicit revert restores the
    /// thread's context anyway when it can, so a leaked apply never bleeds
    /// into unrelated work on a pooled worker thread.
    fn drop(&mut self) {
        if self.reverted {
            return;
        }
        match self.revert() {
            Ok(()) => {
                warn!(apply_id = self.apply_id, "applied-context handle dropped without revert; context restored");
            }
            Err(err) => {
                warn!(apply_id = self.apply_id, error = %err, "dropped applied-context handle could not be reverted");
            }
        }
    }
}

impl std::fmt::Debug for AppliedContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppliedContextHandle")
            .field("apply_id", &self.apply_id)
            .field("reverted", &self.reverted)
            .finish()
    }
}
