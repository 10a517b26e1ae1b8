//! Propagation policy configuration.
//!
//! A [`ContextServiceDefinition`] is the declarative half of context
//! propagation: an ordered classification of context kinds into the three
//! dispositions every kind must have, plus a catch-all disposition for
//! kinds the definition does not mention. Definitions typically originate
//! in deployment configuration, so they serialize with serde.

use crate::errors::{ConfigError, ConfigResult};
use crate::types::ContextKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The three-way classification of a context kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Capture the submitting thread's value and reapply it on the worker.
    Propagated,
    /// Reset the kind to its provider's default value on the worker.
    Cleared,
    /// Leave the worker thread's own value alone.
    Unchanged,
}

impl Disposition {
    const fn label(self) -> &'static str {
        match self {
            Self::Propagated => "propagated",
            Self::Cleared => "cleared",
            Self::Unchanged => "unchanged",
        }
    }
}

/// A named, ordered propagation policy.
///
/// Kinds are applied in declaration order: all propagated kinds first, in
/// the order listed, then cleared kinds. A kind may appear under exactly one
/// disposition; [`ContextServiceDefinitionBuilder::build`] rejects
/// conflicts. Kinds not mentioned anywhere fall under
/// [`remaining`](Self::remaining), which defaults to
/// [`Disposition::Unchanged`] so an unmentioned kind is neither leaked onto
/// the worker nor silently wiped from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextServiceDefinition {
    /// Kinds whose submitting-thread value is captured and reapplied.
    propagated: Vec<ContextKind>,
    /// Kinds reset to their provider's default on the worker.
    cleared: Vec<ContextKind>,
    /// Kinds explicitly left as the worker thread's own value.
    unchanged: Vec<ContextKind>,
    /// Disposition for kinds not listed above.
    remaining: Disposition,
}

impl ContextServiceDefinition {
    /// Starts building a definition.
    pub fn builder() -> ContextServiceDefinitionBuilder {
        ContextServiceDefinitionBuilder::default()
    }

    /// A definition that propagates everything a provider set knows about.
    pub const fn propagate_all() -> Self {
        Self {
            propagated: Vec::new(),
            cleared: Vec::new(),
            unchanged: Vec::new(),
            remaining: Disposition::Propagated,
        }
    }

    /// Kinds whose value is captured and reapplied, in application order.
    pub fn propagated(&self) -> &[ContextKind] {
        &self.propagated
    }

    /// Kinds reset to their provider's default.
    pub fn cleared(&self) -> &[ContextKind] {
        &self.cleared
    }

    /// Kinds explicitly left alone.
    pub fn unchanged(&self) -> &[ContextKind] {
        &self.unchanged
    }

    /// The disposition applied to kinds the definition does not mention.
    pub const fn remaining(&self) -> Disposition {
        self.remaining
    }

    /// The disposition of a specific kind under this definition.
    pub fn disposition_of(&self, kind: &ContextKind) -> Disposition {
        if self.propagated.contains(kind) {
            Disposition::Propagated
        } else if self.cleared.contains(kind) {
            Disposition::Cleared
        } else if self.unchanged.contains(kind) {
            Disposition::Unchanged
        } else {
            self.remaining
        }
    }
}

impl Default for ContextServiceDefinition {
    /// The safest policy: touch nothing unless explicitly told to.
    fn default() -> Self {
        Self {
            propagated: Vec::new(),
            cleared: Vec::new(),
            unchanged: Vec::new(),
            remaining: Disposition::Unchanged,
        }
    }
}

/// Builder for [`ContextServiceDefinition`].
#[derive(Debug, Default)]
pub struct ContextServiceDefinitionBuilder {
    propagated: Vec<ContextKind>,
    cleared: Vec<ContextKind>,
    unchanged: Vec<ContextKind>,
    remaining: Option<Disposition>,
}

impl ContextServiceDefinitionBuilder {
    /// Adds a kind to the propagated list.
    #[must_use]
    pub fn propagate(mut self, kind: ContextKind) -> Self {
        self.propagated.push(kind);
        self
    }

    /// Adds a kind to the cleared list.
    #[must_use]
    pub fn clear(mut self, kind: ContextKind) -> Self {
        self.cleared.push(kind);
        self
    }

    /// Adds a kind to the explicitly-unchanged list.
    #[must_use]
    pub fn leave_unchanged(mut self, kind: ContextKind) -> Self {
        self.unchanged.push(kind);
        self
    }

    /// Sets the disposition for kinds not listed anywhere.
    #[must_use]
    pub const fn remaining(mut self, disposition: Disposition) -> Self {
        self.remaining = Some(disposition);
        self
    }

    /// Validates and builds the definition.
    ///
    /// Fails with [`ConfigError::ConflictingDisposition`] if any kind is
    /// listed under more than one disposition (including twice under the
    /// same one).
    pub fn build(self) -> ConfigResult<ContextServiceDefinition> {
        let mut seen: HashMap<ContextKind, Disposition> = HashMap::new();
        let lists = [
            (Disposition::Propagated, &self.propagated),
            (Disposition::Cleared, &self.cleared),
            (Disposition::Unchanged, &self.unchanged),
        ];
        for (disposition, kinds) in lists {
            for kind in kinds {
                if let Some(first) = seen.insert(kind.clone(), disposition) {
                    return Err(ConfigError::ConflictingDisposition {
                        kind: kind.clone(),
                        first: first.label(),
                        second: disposition.label(),
                    });
                }
            }
        }

        Ok(ContextServiceDefinition {
            propagated: self.propagated,
            cleared: self.cleared,
            unchanged: self.unchanged,
            remaining: self.remaining.unwrap_or(Disposition::Unchanged),
        })
    }
}
