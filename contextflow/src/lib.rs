//! `Contextflow` - Thread-context propagation with managed executors
//!
//! This library captures a bundle of ambient execution context (application
//! metadata, security identity, transaction association, custom kinds) on
//! one thread and faithfully re-establishes then tears it down on another
//! thread that executes a submitted task, within a concurrency-controlled
//! executor.
//!
//! # Core pieces
//!
//! - [`ContextService`] — converts a declared propagation policy plus the
//!   calling thread's ambient state into an immutable [`ContextSnapshot`]
//! - [`ContextSnapshot`] — applies captured context onto whatever thread
//!   later runs the task, and reliably reverses that application
//! - [`PolicyExecutor`] — bounded concurrency, bounded queueing, start
//!   timeouts
//! - [`ManagedExecutor`] — the composition applications submit tasks to:
//!   capture at submit time, apply/revert around execution on the worker
//! - [`ExecutorRegistry`] — named, create-on-first-use executor lifecycle
//!
//! Providers are injected explicitly; there is no service discovery and no
//! global mutable state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod errors;
pub mod executor;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod scope;
pub mod service;
pub mod snapshot;
pub mod types;

pub use config::{ContextServiceDefinition, ContextServiceDefinitionBuilder, Disposition};
pub use errors::{
    CaptureError, CaptureResult, ConfigError, ConfigResult, MisuseError, MisuseResult,
    SubmitError, SubmitResult, TaskError, TaskResult,
};
pub use executor::ManagedExecutor;
pub use policy::{PolicyExecutor, PolicyExecutorConfig, TaskHandle};
pub use provider::{CaptureOutcome, CapturedContext, ContextProvider, Requirement, RestoredContext};
pub use registry::ExecutorRegistry;
pub use scope::{Activation, ActiveScope, ScopeActivator, ScopeError};
pub use service::ContextService;
pub use snapshot::{AppliedContextHandle, ContextSnapshot};
pub use types::{ContextKind, ExecutorName, SnapshotId, Timestamp};
