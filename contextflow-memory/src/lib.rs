//! In-memory context providers for the `Contextflow` propagation library
//!
//! This crate provides in-memory implementations of the `ContextProvider`
//! and `ScopeActivator` traits from the contextflow crate, useful for
//! testing and development scenarios where no real container-managed
//! ambient state exists.
//!
//! Each [`InMemoryContextProvider`] owns one string-valued ambient slot in
//! thread-local storage: `set_current` arranges a thread's ambient value,
//! capture reads it, and apply/restore move it between threads the same way
//! a real provider would move a security identity or transaction
//! association.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use contextflow::errors::CaptureResult;
use contextflow::provider::{
    CaptureOutcome, CapturedContext, ContextProvider, Requirement, RestoredContext,
};
use contextflow::scope::{Activation, ActiveScope, ScopeActivator, ScopeError};
use contextflow::types::ContextKind;

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // One map per thread: slot id -> that thread's ambient value.
    static AMBIENT: RefCell<HashMap<u64, String>> = RefCell::new(HashMap::new());
    static SCOPE_DEPTH: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

/// A string-valued in-memory context provider.
///
/// Mandatory by default: an unset ambient value captures as "absent" and
/// propagates absence. The [`optional`](Self::optional) constructor instead
/// reports [`CaptureOutcome::NotActive`] when unset, exercising the
/// skip-optional-providers path.
#[derive(Debug)]
pub struct InMemoryContextProvider {
    kind: ContextKind,
    slot: u64,
    requirement: Requirement,
}

impl InMemoryContextProvider {
    /// Creates a mandatory provider for `kind`.
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            slot: NEXT_SLOT.fetch_add(1, Ordering::Relaxed),
            requirement: Requirement::Mandatory,
        }
    }

    /// Creates an optional provider for `kind`: capture reports
    /// `NotActive` when the calling thread has no ambient value.
    pub fn optional(kind: ContextKind) -> Self {
        Self {
            kind,
            slot: NEXT_SLOT.fetch_add(1, Ordering::Relaxed),
            requirement: Requirement::Optional,
        }
    }

    /// Sets the calling thread's ambient value for this provider.
    pub fn set_current(&self, value: impl Into<String>) {
        let value = value.into();
        AMBIENT.with(|map| {
            map.borrow_mut().insert(self.slot, value);
        });
    }

    /// Removes the calling thread's ambient value for this provider.
    pub fn clear_current(&self) {
        AMBIENT.with(|map| {
            map.borrow_mut().remove(&self.slot);
        });
    }

    /// The calling thread's current ambient value for this provider.
    pub fn current(&self) -> Option<String> {
        AMBIENT.with(|map| map.borrow().get(&self.slot).cloned())
    }
}

impl ContextProvider for InMemoryContextProvider {
    fn kind(&self) -> ContextKind {
        self.kind.clone()
    }

    fn requirement(&self) -> Requirement {
        self.requirement
    }

    fn capture(&self) -> CaptureResult<CaptureOutcome> {
        let current = self.current();
        if current.is_none() && self.requirement == Requirement::Optional {
            return Ok(CaptureOutcome::NotActive);
        }
        Ok(CaptureOutcome::Captured(Box::new(SlotContext {
            slot: self.slot,
            value: current,
        })))
    }

    fn default_context(&self) -> Box<dyn CapturedContext> {
        // Cleared means unset: the default for every slot is absence.
        Box::new(SlotContext {
            slot: self.slot,
            value: None,
        })
    }
}

struct SlotContext {
    slot: u64,
    value: Option<String>,
}

struct SlotRestorer {
    slot: u64,
    previous: Option<String>,
}

impl CapturedContext for SlotContext {
    fn apply(&self) -> Box<dyn RestoredContext> {
        let previous = AMBIENT.with(|map| {
            let mut map = map.borrow_mut();
            match &self.value {
                Some(value) => map.insert(self.slot, value.clone()),
                None => map.remove(&self.slot),
            }
        });
        Box::new(SlotRestorer {
            slot: self.slot,
            previous,
        })
    }
}

impl RestoredContext for SlotRestorer {
    fn restore(self: Box<Self>) {
        AMBIENT.with(|map| {
            let mut map = map.borrow_mut();
            match self.previous {
                Some(value) => map.insert(self.slot, value),
                None => map.remove(&self.slot),
            }
        });
    }
}

/// An in-memory scope activator with an external teardown switch.
///
/// Models a request-scope facility: activation marks the scope active on
/// the current thread; [`tear_down`](Self::tear_down) simulates the scope
/// being destroyed concurrently (application shutdown), after which
/// deactivation reports [`ScopeError::AlreadyInactive`] — the benign race
/// callers swallow.
#[derive(Debug)]
pub struct InMemoryScopeActivator {
    slot: u64,
    available: AtomicBool,
    torn_down: Arc<AtomicBool>,
    fail_deactivation: Arc<AtomicBool>,
}

impl Default for InMemoryScopeActivator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScopeActivator {
    /// Creates an available activator.
    pub fn new() -> Self {
        Self {
            slot: NEXT_SLOT.fetch_add(1, Ordering::Relaxed),
            available: AtomicBool::new(true),
            torn_down: Arc::new(AtomicBool::new(false)),
            fail_deactivation: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates an activator whose scope facility is not present; every
    /// activation reports [`Activation::Unavailable`].
    pub fn unavailable() -> Self {
        let activator = Self::new();
        activator.available.store(false, Ordering::SeqCst);
        activator
    }

    /// Simulates concurrent scope teardown: subsequent deactivations report
    /// [`ScopeError::AlreadyInactive`].
    pub fn tear_down(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }

    /// Makes subsequent deactivations fail with [`ScopeError::Failure`].
    pub fn fail_deactivation(&self) {
        self.fail_deactivation.store(true, Ordering::SeqCst);
    }

    /// Whether the scope is active on the calling thread.
    pub fn is_active(&self) -> bool {
        SCOPE_DEPTH.with(|depth| depth.borrow().get(&self.slot).is_some_and(|d| *d > 0))
    }
}

impl ScopeActivator for InMemoryScopeActivator {
    fn activate(&self) -> Activation {
        if !self.available.load(Ordering::SeqCst) {
            return Activation::Unavailable;
        }
        SCOPE_DEPTH.with(|depth| {
            *depth.borrow_mut().entry(self.slot).or_insert(0) += 1;
        });
        Activation::Activated(Box::new(ActiveMemoryScope {
            slot: self.slot,
            torn_down: Arc::clone(&self.torn_down),
            fail_deactivation: Arc::clone(&self.fail_deactivation),
        }))
    }
}

struct ActiveMemoryScope {
    slot: u64,
    torn_down: Arc<AtomicBool>,
    fail_deactivation: Arc<AtomicBool>,
}

impl ActiveScope for ActiveMemoryScope {
    fn deactivate(self: Box<Self>) -> Result<(), ScopeError> {
        SCOPE_DEPTH.with(|depth| {
            let mut depth = depth.borrow_mut();
            if let Some(d) = depth.get_mut(&self.slot) {
                *d = d.saturating_sub(1);
            }
        });
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(ScopeError::AlreadyInactive);
        }
        if self.fail_deactivation.load(Ordering::SeqCst) {
            return Err(ScopeError::Failure("simulated deactivation failure".to_string()));
        }
        Ok(())
    }
}
