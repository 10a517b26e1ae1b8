//! The context provider contract.
//!
//! A [`ContextProvider`] knows how to read one kind of ambient,
//! thread-associated state (the security identity, the active transaction,
//! an application label) and how to re-establish a previously read value on
//! another thread. Providers are injected into a
//! [`ContextService`](crate::service::ContextService) at construction time;
//! there is no global provider registry and no runtime discovery.
//!
//! The capture path is deliberately a tri-state: a provider either captured
//! a value, reported that its context is not active on this thread, or
//! failed. Making "not active" a value rather than an error lets the policy
//! layer decide — optional providers are skipped, mandatory ones fail the
//! capture — and keeps that decision exhaustively checked by the compiler.

use crate::errors::CaptureResult;
use crate::types::ContextKind;

/// Whether a provider's context must be available at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Capture fails if this provider's context cannot be read.
    Mandatory,
    /// A provider that reports [`CaptureOutcome::NotActive`] is skipped
    /// gracefully. Request-scoped context is the canonical example: the
    /// scope may legitimately not be active on the submitting thread.
    Optional,
}

/// The result of asking a provider to read the calling thread's state.
pub enum CaptureOutcome {
    /// The provider read a value that can later be reapplied elsewhere.
    Captured(Box<dyn CapturedContext>),
    /// The provider's context is not active on the calling thread.
    NotActive,
}

impl std::fmt::Debug for CaptureOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Captured(_) => f.write_str("Captured"),
            Self::NotActive => f.write_str("NotActive"),
        }
    }
}

/// A provider of one kind of ambient context.
///
/// Implementations must treat [`capture`](Self::capture) as a pure read of
/// the calling thread's state: capturing must not mutate the provider's own
/// registries or the thread's ambient state.
pub trait ContextProvider: Send + Sync {
    /// The kind of context this provider handles.
    fn kind(&self) -> ContextKind;

    /// Whether this provider must be available at capture time.
    fn requirement(&self) -> Requirement {
        Requirement::Mandatory
    }

    /// Reads the calling thread's current value for this kind.
    ///
    /// Must be called from the thread whose context is being captured.
    fn capture(&self) -> CaptureResult<CaptureOutcome>;

    /// The default (cleared/reset) value for this kind, established when a
    /// policy lists the kind as cleared.
    fn default_context(&self) -> Box<dyn CapturedContext>;
}

/// A self-contained, reapplicable context value.
///
/// Captured contexts are immutable and shared: the same value may be applied
/// concurrently on many threads, so [`apply`](Self::apply) takes `&self` and
/// all per-thread undo bookkeeping lives in the returned restorer.
pub trait CapturedContext: Send + Sync {
    /// Establishes this value as the current thread's ambient value and
    /// returns the record needed to undo exactly that establishment.
    fn apply(&self) -> Box<dyn RestoredContext>;
}

/// The undo record for one provider's apply on one thread.
///
/// Restorers are consumed exactly once, on the thread they were created on,
/// in reverse apply order.
pub trait RestoredContext: Send {
    /// Re-establishes the value that was current immediately before the
    /// matching apply.
    fn restore(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static SLOT: Cell<Option<u32>> = const { Cell::new(None) };
    }

    struct SlotProvider;

    struct SlotValue(Option<u32>);

    struct SlotRestorer(Option<u32>);

    impl ContextProvider for SlotProvider {
        fn kind(&self) -> ContextKind {
            ContextKind::try_new("slot").unwrap()
        }

        fn capture(&self) -> CaptureResult<CaptureOutcome> {
            Ok(CaptureOutcome::Captured(Box::new(SlotValue(
                SLOT.with(Cell::get),
            ))))
        }

        fn default_context(&self) -> Box<dyn CapturedContext> {
            Box::new(SlotValue(None))
        }
    }

    impl CapturedContext for SlotValue {
        fn apply(&self) -> Box<dyn RestoredContext> {
            let previous = SLOT.with(|slot| slot.replace(self.0));
            Box::new(SlotRestorer(previous))
        }
    }

    impl RestoredContext for SlotRestorer {
        fn restore(self: Box<Self>) {
            SLOT.with(|slot| slot.set(self.0));
        }
    }

    #[test]
    fn default_requirement_is_mandatory() {
        assert_eq!(SlotProvider.requirement(), Requirement::Mandatory);
    }

    #[test]
    fn apply_then_restore_round_trips_the_slot() {
        SLOT.with(|slot| slot.set(Some(7)));
        let captured = match SlotProvider.capture().unwrap() {
            CaptureOutcome::Captured(c) => c,
            CaptureOutcome::NotActive => panic!("slot provider is always active"),
        };

        SLOT.with(|slot| slot.set(Some(99)));
        let restorer = captured.apply();
        assert_eq!(SLOT.with(Cell::get), Some(7));

        restorer.restore();
        assert_eq!(SLOT.with(Cell::get), Some(99));
    }

    #[test]
    fn default_context_clears_the_slot() {
        SLOT.with(|slot| slot.set(Some(3)));
        let restorer = SlotProvider.default_context().apply();
        assert_eq!(SLOT.with(Cell::get), None);
        restorer.restore();
        assert_eq!(SLOT.with(Cell::get), Some(3));
    }
}
