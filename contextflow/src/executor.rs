//! The managed executor: context propagation composed with admission
//! control.
//!
//! A [`ManagedExecutor`] is the application-facing submission point. For
//! every submitted task it captures a [`ContextSnapshot`] **at submission
//! time** — the critical correctness property: propagated context reflects
//! the submitter's ambient state, never whatever thread happens to run the
//! task later — wraps the task so the worker performs apply → run → revert,
//! and delegates the wrapped task to its [`PolicyExecutor`].
//!
//! # Example
//!
//! ```rust,ignore
//! let service = Arc::new(ContextService::new(definition, providers));
//! let executor = ManagedExecutor::new(name, service, PolicyExecutorConfig::default());
//!
//! let handle = executor.submit(|| expensive_work())?;
//! let result = handle.await?;
//! ```

use crate::errors::{SubmitResult, TaskError, TaskResult};
use crate::policy::{PolicyExecutor, PolicyExecutorConfig, TaskHandle};
use crate::scope::ScopeActivator;
use crate::service::ContextService;
use crate::snapshot::ContextSnapshot;
use crate::types::ExecutorName;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// An executor that runs every task under the submitter's captured context.
///
/// Created once per logical executor name and shared by all submitting
/// threads. Not tied to any thread; safe for concurrent submissions.
pub struct ManagedExecutor {
    name: ExecutorName,
    context_service: Arc<ContextService>,
    policy: PolicyExecutor,
    scope_activator: Option<Arc<dyn ScopeActivator>>,
}

impl ManagedExecutor {
    /// Creates a managed executor from its collaborators.
    ///
    /// Panics if called outside a Tokio runtime context (the policy
    /// executor binds to the current runtime).
    pub fn new(
        name: ExecutorName,
        context_service: Arc<ContextService>,
        policy_config: PolicyExecutorConfig,
    ) -> Self {
        Self {
            name,
            context_service,
            policy: PolicyExecutor::new(policy_config),
            scope_activator: None,
        }
    }

    /// Attaches an optional scope activator, activated on the worker after
    /// context apply and deactivated before revert.
    #[must_use]
    pub fn with_scope_activator(mut self, activator: Arc<dyn ScopeActivator>) -> Self {
        self.scope_activator = Some(activator);
        self
    }

    /// The name this executor is registered under.
    pub const fn name(&self) -> &ExecutorName {
        &self.name
    }

    /// The context service whose policy governs this executor.
    pub fn context_service(&self) -> &Arc<ContextService> {
        &self.context_service
    }

    /// Submits a task, capturing the submitting thread's context first.
    ///
    /// Capture happens strictly before the hand-off is acknowledged, so a
    /// successful return means "context as of submit time" is what the task
    /// will observe. Capture failures and admission rejections surface
    /// synchronously; the task never runs in either case.
    pub fn submit<T, F>(&self, task: F) -> SubmitResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let snapshot = self.context_service.capture()?;
        self.submit_with_snapshot(snapshot, task)
    }

    /// Submits a task under a pre-captured snapshot.
    ///
    /// Useful when one capture should govern a batch of tasks; the snapshot
    /// is immutable and safely shared across concurrent submissions.
    pub fn submit_with_snapshot<T, F>(
        &self,
        snapshot: ContextSnapshot,
        task: F,
    ) -> SubmitResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        debug!(executor = %self.name, snapshot_id = %snapshot.id(), "submitting contextualized task");
        let activator = self.scope_activator.clone();
        let wrapped = move || -> TaskResult<T> {
            // The panic is caught inside the contextualized region, so the
            // revert in run_with_context/run_in_scope always executes
            // before the failure is reported.
            let guarded = move || catch_unwind(AssertUnwindSafe(task));
            let outcome = match activator {
                Some(activator) => snapshot.run_in_scope(activator.as_ref(), guarded),
                None => snapshot.run_with_context(guarded),
            };
            outcome.map_err(TaskError::from_panic)
        };
        self.policy.submit(wrapped)
    }

    /// Fire-and-forget submission.
    ///
    /// The task runs under the submitter's captured context; its result is
    /// discarded. Submission-time failures still surface synchronously.
    pub fn execute<F>(&self, task: F) -> SubmitResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(task).map(drop)
    }

    /// Submits a value-producing task for `.await`-style composition.
    ///
    /// Equivalent to [`submit`](Self::submit); named for callers arriving
    /// from completion-stage style APIs.
    pub fn supply_async<T, F>(&self, supplier: F) -> SubmitResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(supplier)
    }

    /// Shuts down the underlying policy executor.
    ///
    /// New submissions are rejected; queued tasks resolve as cancelled;
    /// running tasks complete, with their context reverted as always.
    pub fn shutdown(&self) {
        debug!(executor = %self.name, "shutting down managed executor");
        self.policy.shutdown();
    }

    /// Whether this executor has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.policy.is_shut_down()
    }
}

impl std::fmt::Debug for ManagedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedExecutor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("has_scope_activator", &self.scope_activator.is_some())
            .finish()
    }
}
