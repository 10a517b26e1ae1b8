//! The context service: policy + providers → snapshots.
//!
//! A [`ContextService`] converts "the declared propagation policy plus the
//! calling thread's current ambient state" into an immutable
//! [`ContextSnapshot`]. The provider set is injected explicitly at
//! construction time as a map from kind to provider — no service-loader
//! discovery, no global registry.

use crate::config::{ContextServiceDefinition, Disposition};
use crate::errors::{CaptureError, CaptureResult};
use crate::provider::{CaptureOutcome, ContextProvider, Requirement};
use crate::snapshot::{ContextSnapshot, SnapshotEntry};
use crate::types::ContextKind;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Produces [`ContextSnapshot`]s from the calling thread's ambient state.
///
/// Shared, read-mostly: one service instance serves concurrent `capture`
/// calls from many submitting threads.
pub struct ContextService {
    definition: ContextServiceDefinition,
    providers: HashMap<ContextKind, Arc<dyn ContextProvider>>,
}

impl ContextService {
    /// Creates a service from a definition and an explicit provider set.
    ///
    /// Provider order inside the map does not matter; capture follows the
    /// definition's declaration order, then the registration order of any
    /// kinds covered only by the `remaining` disposition.
    pub fn new(
        definition: ContextServiceDefinition,
        providers: Vec<Arc<dyn ContextProvider>>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.kind(), provider))
            .collect();
        Self {
            definition,
            providers,
        }
    }

    /// The policy this service captures under.
    pub const fn definition(&self) -> &ContextServiceDefinition {
        &self.definition
    }

    /// Captures the calling thread's ambient state per the policy.
    ///
    /// Capture is a pure read: no provider registry or ambient state is
    /// mutated. The resulting snapshot is self-contained — reapplying it
    /// later does not require the capturing thread to still exist or to
    /// still hold the same state.
    ///
    /// Optional providers whose context is not active are skipped
    /// gracefully; a mandatory kind without a usable provider fails with
    /// [`CaptureError::ProviderUnavailable`].
    pub fn capture(&self) -> CaptureResult<ContextSnapshot> {
        let mut entries = Vec::new();

        for kind in self.definition.propagated() {
            self.capture_propagated(kind, &mut entries)?;
        }
        for kind in self.definition.cleared() {
            self.capture_cleared(kind, &mut entries)?;
        }
        for kind in self.definition.unchanged() {
            entries.push(SnapshotEntry::Unchanged { kind: kind.clone() });
        }

        // Registered kinds the definition does not mention fall under the
        // remaining disposition, default Unchanged.
        let mut leftover: Vec<&ContextKind> = self
            .providers
            .keys()
            .filter(|kind| !self.is_listed(kind))
            .collect();
        leftover.sort();
        for kind in leftover {
            match self.definition.remaining() {
                Disposition::Propagated => self.capture_propagated(kind, &mut entries)?,
                Disposition::Cleared => self.capture_cleared(kind, &mut entries)?,
                Disposition::Unchanged => {
                    entries.push(SnapshotEntry::Unchanged { kind: kind.clone() });
                }
            }
        }

        let snapshot = ContextSnapshot::new(entries);
        debug!(snapshot_id = %snapshot.id(), "captured context snapshot");
        Ok(snapshot)
    }

    fn is_listed(&self, kind: &ContextKind) -> bool {
        self.definition.propagated().contains(kind)
            || self.definition.cleared().contains(kind)
            || self.definition.unchanged().contains(kind)
    }

    fn capture_propagated(
        &self,
        kind: &ContextKind,
        entries: &mut Vec<SnapshotEntry>,
    ) -> CaptureResult<()> {
        let Some(provider) = self.providers.get(kind) else {
            return Err(CaptureError::ProviderUnavailable { kind: kind.clone() });
        };
        match provider.capture()? {
            CaptureOutcome::Captured(value) => entries.push(SnapshotEntry::Propagate {
                kind: kind.clone(),
                value: Arc::from(value),
            }),
            CaptureOutcome::NotActive => match provider.requirement() {
                Requirement::Optional => {
                    debug!(%kind, "optional context not active at capture time; skipping");
                    entries.push(SnapshotEntry::Unchanged { kind: kind.clone() });
                }
                Requirement::Mandatory => {
                    return Err(CaptureError::ProviderUnavailable { kind: kind.clone() });
                }
            },
        }
        Ok(())
    }

    fn capture_cleared(
        &self,
        kind: &ContextKind,
        entries: &mut Vec<SnapshotEntry>,
    ) -> CaptureResult<()> {
        let Some(provider) = self.providers.get(kind) else {
            return Err(CaptureError::ProviderUnavailable { kind: kind.clone() });
        };
        entries.push(SnapshotEntry::Clear {
            kind: kind.clone(),
            default: Arc::from(provider.default_context()),
        });
        Ok(())
    }
}

impl std::fmt::Debug for ContextService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextService")
            .field("definition", &self.definition)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
