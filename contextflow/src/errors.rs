//! Error types for `Contextflow`.
//!
//! This module provides error types for all failure scenarios in the context
//! propagation system. The error design follows these principles:
//!
//! - **Rich error information**: Include context to help diagnose issues
//! - **Type safety**: Different error types for different subsystems
//! - **Actionable**: Users can determine how to handle each error
//! - **Composable**: Errors can be converted between layers
//!
//! # Error Categories
//!
//! - **`CaptureError`**: A context snapshot could not be taken
//! - **`ConfigError`**: A propagation policy or executor definition is invalid
//! - **`MisuseError`**: An applied-context handle was used incorrectly
//! - **`SubmitError`**: A task could not be handed off to an executor
//! - **`TaskError`**: A handed-off task did not run to completion
//!
//! # Handling Strategy
//!
//! - **`CaptureError`**: the submission never happened; fix the provider set
//! - **`ConfigError`**: reject the deployment configuration, do not guess
//! - **`MisuseError`**: a programming error; fail fast, never swallow
//! - **`SubmitError::QueueFull`**: back off and retry, or shed load
//! - **`TaskError`**: the task never ran (`StartTimeout`, `Cancelled`) or
//!   failed mid-flight (`Panicked`); context was reverted either way

use crate::types::{ContextKind, ExecutorName};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while capturing a context snapshot.
///
/// Capture happens on the submitting thread, before the task is handed off.
/// A capture error is fatal to the submission: the task never runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// A kind the policy depends on has no usable provider: either no
    /// provider is registered for it, or a mandatory provider reported
    /// that its context is not active on the capturing thread.
    #[error("no usable context provider for mandatory kind '{kind}'")]
    ProviderUnavailable {
        /// The kind that could not be captured or cleared.
        kind: ContextKind,
    },

    /// A provider failed internally while reading the calling thread's state.
    #[error("context provider for kind '{kind}' failed during capture: {message}")]
    Provider {
        /// The kind whose provider failed.
        kind: ContextKind,
        /// The provider's own description of the failure.
        message: String,
    },
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors in propagation policies and executor definitions.
///
/// Configuration errors are detected eagerly, when a definition is built or
/// an executor is registered, never at task execution time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A context kind was listed under two different dispositions within
    /// the same definition. Every kind must have exactly one disposition.
    #[error("context kind '{kind}' is listed under both '{first}' and '{second}'")]
    ConflictingDisposition {
        /// The kind with conflicting dispositions.
        kind: ContextKind,
        /// The disposition it was first listed under.
        first: &'static str,
        /// The disposition it was listed under again.
        second: &'static str,
    },

    /// Two executor definitions share a name but differ in policy.
    /// Duplicate definitions are flagged rather than silently resolved.
    #[error("conflicting definitions registered under executor name '{name}'")]
    DuplicateDefinition {
        /// The contested executor name.
        name: ExecutorName,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Programming errors in the use of an applied-context handle.
///
/// These indicate a bug in the calling code, not an environmental failure.
/// The library fails fast on them rather than risk corrupting a pooled
/// worker thread's ambient state. Cross-thread reverts are prevented at
/// compile time (the handle is not `Send`), so they need no runtime variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MisuseError {
    /// The handle was already reverted. The first revert's effects remain
    /// intact; the second is rejected.
    #[error("applied-context handle was already reverted")]
    DoubleRevert,

    /// The handle is not the most recent un-reverted apply on this thread.
    /// Reverts must follow stack discipline: last applied, first reverted.
    #[error("revert does not match the innermost apply on this thread")]
    OutOfOrderRevert,
}

/// Result type for revert operations.
pub type MisuseResult<T> = Result<T, MisuseError>;

/// Errors that prevent a task from being handed off to an executor.
///
/// Submit errors surface synchronously from `submit`/`execute`; the task
/// never runs and no context was applied anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Context capture failed on the submitting thread.
    #[error("context capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// The executor's queue is at capacity and no concurrency permit was
    /// immediately available.
    #[error("executor queue full (capacity {capacity})")]
    QueueFull {
        /// The configured queue capacity that was exceeded.
        capacity: usize,
    },

    /// The executor has been shut down and accepts no new work.
    #[error("executor is shut down")]
    ShutDown,
}

/// Result type for task submission.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Errors reported through a task handle after a successful hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task could not begin within the configured start timeout.
    /// The contract is atomic: a timed-out task never started at all.
    #[error("task did not start within {waited:?}")]
    StartTimeout {
        /// How long the task waited for a concurrency permit.
        waited: Duration,
    },

    /// The task was cancelled before it started, or its executor was shut
    /// down while it was queued.
    #[error("task was cancelled before it started")]
    Cancelled,

    /// The task body panicked. Applied context was reverted before the
    /// panic was converted into this error.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Converts a caught panic payload into a `Panicked` error, extracting
    /// the message when the payload is a string.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Result type carried by task handles.
pub type TaskResult<T> = Result<T, TaskError>;
