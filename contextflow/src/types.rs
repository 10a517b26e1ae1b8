//! Core types for the `Contextflow` context propagation library.
//!
//! This module defines the fundamental types used throughout the library.
//! All types use smart constructors to ensure validity at construction time,
//! following the "parse, don't validate" principle.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a category of ambient, thread-associated state.
///
/// A `ContextKind` names one kind of context a provider can capture and
/// reapply: the application a thread is working on behalf of, the security
/// identity it runs as, its transaction association, or any custom kind an
/// embedder registers. Kinds are compared by name.
///
/// `ContextKind` values are guaranteed to be non-empty and at most 64
/// characters. Once constructed, a `ContextKind` is always valid.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ContextKind(String);

impl ContextKind {
    /// The application-metadata context kind.
    pub fn application() -> Self {
        Self::try_new("application").expect("well-known kind is always valid")
    }

    /// The security-identity context kind.
    pub fn security() -> Self {
        Self::try_new("security").expect("well-known kind is always valid")
    }

    /// The transaction-association context kind.
    pub fn transaction() -> Self {
        Self::try_new("transaction").expect("well-known kind is always valid")
    }
}

/// The name under which a managed executor is registered.
///
/// `ExecutorName` values are guaranteed to be non-empty and at most 255
/// characters. The registry maps each name to exactly one executor instance.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ExecutorName(String);

/// A globally unique snapshot identifier using UUIDv7 format.
///
/// `SnapshotId` values are guaranteed to be UUIDv7, which provides:
/// - Time-based ordering capability
/// - Globally unique identification
/// - Monotonic sort order for snapshots captured in sequence
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    /// Creates a new `SnapshotId` with the current timestamp.
    ///
    /// This is a convenience method that generates a new `UUIDv7`.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

/// A timestamp for when a snapshot was captured.
///
/// This wrapper ensures consistent timestamp handling throughout the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
