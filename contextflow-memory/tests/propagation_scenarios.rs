//! Context propagation scenarios across threads and executors.
//!
//! These tests exercise the end-to-end contract: context captured on a
//! submitting thread is observed by the task wherever it runs, worker
//! threads are restored after every task, and misuse of applied-context
//! handles fails fast.

#![allow(clippy::similar_names)]
#![allow(clippy::uninlined_format_args)]

use contextflow::{
    ContextKind, ContextService, ContextServiceDefinition, ExecutorName, ManagedExecutor,
    MisuseError, PolicyExecutorConfig, TaskError,
};
use contextflow_memory::{InMemoryContextProvider, InMemoryScopeActivator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn kind(name: &str) -> ContextKind {
    ContextKind::try_new(name).unwrap()
}

struct Fixture {
    application: Arc<InMemoryContextProvider>,
    security: Arc<InMemoryContextProvider>,
    tenant: Arc<InMemoryContextProvider>,
    service: Arc<ContextService>,
}

/// propagated = {application}, cleared = {security}, unchanged = everything
/// else (the tenant kind is deliberately unmentioned).
fn fixture() -> Fixture {
    init_tracing();
    let application = Arc::new(InMemoryContextProvider::new(kind("application")));
    let security = Arc::new(InMemoryContextProvider::new(kind("security")));
    let tenant = Arc::new(InMemoryContextProvider::new(kind("tenant")));

    let definition = ContextServiceDefinition::builder()
        .propagate(kind("application"))
        .clear(kind("security"))
        .build()
        .unwrap();
    let service = Arc::new(ContextService::new(
        definition,
        vec![
            Arc::clone(&application) as _,
            Arc::clone(&security) as _,
            Arc::clone(&tenant) as _,
        ],
    ));

    Fixture {
        application,
        security,
        tenant,
        service,
    }
}

#[test]
fn scenario_a_propagate_clear_and_leave_alone() {
    let fixture = fixture();
    fixture.application.set_current("AppX");
    fixture.security.set_current("UserY");

    let snapshot = fixture.service.capture().unwrap();

    let application = Arc::clone(&fixture.application);
    let security = Arc::clone(&fixture.security);
    let tenant = Arc::clone(&fixture.tenant);
    std::thread::spawn(move || {
        // The worker has its own ambient state before the task arrives.
        security.set_current("UserZ");
        tenant.set_current("TenantW");

        let (app_seen, sec_seen, tenant_seen) = snapshot.run_with_context(|| {
            (application.current(), security.current(), tenant.current())
        });

        // Propagated from the submitter; cleared to default; left alone.
        assert_eq!(app_seen.as_deref(), Some("AppX"));
        assert_eq!(sec_seen, None);
        assert_eq!(tenant_seen.as_deref(), Some("TenantW"));

        // Revert restored the worker's own state.
        assert_eq!(security.current().as_deref(), Some("UserZ"));
        assert_eq!(application.current(), None);
    })
    .join()
    .unwrap();

    // The submitting thread was never touched.
    assert_eq!(fixture.application.current().as_deref(), Some("AppX"));
    assert_eq!(fixture.security.current().as_deref(), Some("UserY"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_b_throwing_task_leaves_no_residue() {
    let fixture = fixture();
    fixture.application.set_current("AppX");

    let executor = ManagedExecutor::new(
        ExecutorName::try_new("scenario-b").unwrap(),
        Arc::clone(&fixture.service),
        PolicyExecutorConfig::default(),
    );

    let handle = executor
        .submit(|| -> usize { panic!("business rule violated") })
        .unwrap();
    match handle.await {
        Err(TaskError::Panicked(message)) => assert!(message.contains("business rule violated")),
        other => panic!("expected Panicked, got {other:?}"),
    }

    // Probe the pool repeatedly: no worker thread may carry leftover
    // context from the failed task. Ambient state is thread-local, so the
    // arrangement and the capture happen in one synchronous region.
    let application = Arc::clone(&fixture.application);
    for _ in 0..16 {
        let application = Arc::clone(&application);
        fixture.application.set_current("AppX");
        let snapshot = fixture.service.capture().unwrap();
        let probe = executor
            .submit_with_snapshot(snapshot, move || application.current())
            .unwrap();
        // The probe propagates "AppX" itself; what must not appear is any
        // value the probe did not propagate.
        assert_eq!(probe.await.unwrap().as_deref(), Some("AppX"));
    }

    // A second probe under a touch-nothing policy sees the worker's raw
    // ambient state, which must be clean.
    let probe_service = ContextService::new(
        ContextServiceDefinition::default(),
        vec![Arc::clone(&fixture.application) as _],
    );
    for _ in 0..16 {
        let application = Arc::clone(&fixture.application);
        let snapshot = probe_service.capture().unwrap();
        let probe = executor
            .submit_with_snapshot(snapshot, move || application.current())
            .unwrap();
        assert_eq!(probe.await.unwrap(), None);
    }
}

#[test]
fn scenario_d_double_revert_fails_fast() {
    let fixture = fixture();
    fixture.application.set_current("AppX");

    let snapshot = fixture.service.capture().unwrap();
    fixture.application.set_current("AppOther");

    let mut handle = snapshot.apply();
    assert_eq!(fixture.application.current().as_deref(), Some("AppX"));

    handle.revert().unwrap();
    assert_eq!(fixture.application.current().as_deref(), Some("AppOther"));

    // Second revert is rejected; the first revert's effects stand.
    assert_eq!(handle.revert(), Err(MisuseError::DoubleRevert));
    assert_eq!(fixture.application.current().as_deref(), Some("AppOther"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn p1_task_observes_submit_time_context() {
    let fixture = fixture();
    fixture.application.set_current("Before");

    let executor = ManagedExecutor::new(
        ExecutorName::try_new("p1").unwrap(),
        Arc::clone(&fixture.service),
        PolicyExecutorConfig::default(),
    );

    let (release, gate) = mpsc::channel::<()>();
    let application = Arc::clone(&fixture.application);
    let handle = executor
        .submit(move || {
            gate.recv().ok();
            application.current()
        })
        .unwrap();

    // The submitter moves on after submission; the capture already
    // happened, so the task still sees the submit-time value.
    fixture.application.set_current("After");
    release.send(()).unwrap();

    assert_eq!(handle.await.unwrap().as_deref(), Some("Before"));
}

#[test]
fn p4_concurrent_reuse_of_one_snapshot() {
    let fixture = fixture();
    fixture.application.set_current("Shared");
    let snapshot = fixture.service.capture().unwrap();

    let barrier = Arc::new(std::sync::Barrier::new(4));
    let mut workers = Vec::new();
    for seed in 0..4 {
        let snapshot = snapshot.clone();
        let application = Arc::clone(&fixture.application);
        let barrier = Arc::clone(&barrier);
        workers.push(std::thread::spawn(move || {
            let own = format!("own-{seed}");
            application.set_current(own.clone());

            let mut handle = snapshot.apply();
            barrier.wait();
            assert_eq!(application.current().as_deref(), Some("Shared"));

            handle.revert().unwrap();
            assert_eq!(application.current(), Some(own));
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn nested_snapshots_restore_in_stack_order() {
    let fixture = fixture();

    fixture.application.set_current("outer");
    let outer = fixture.service.capture().unwrap();
    fixture.application.set_current("inner");
    let inner = fixture.service.capture().unwrap();
    fixture.application.set_current("base");

    let mut outer_handle = outer.apply();
    assert_eq!(fixture.application.current().as_deref(), Some("outer"));
    let mut inner_handle = inner.apply();
    assert_eq!(fixture.application.current().as_deref(), Some("inner"));

    assert_eq!(outer_handle.revert(), Err(MisuseError::OutOfOrderRevert));

    inner_handle.revert().unwrap();
    assert_eq!(fixture.application.current().as_deref(), Some("outer"));
    outer_handle.revert().unwrap();
    assert_eq!(fixture.application.current().as_deref(), Some("base"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optional_inactive_provider_is_skipped_end_to_end() {
    let request = Arc::new(InMemoryContextProvider::optional(kind("request")));
    let definition = ContextServiceDefinition::builder()
        .propagate(kind("request"))
        .build()
        .unwrap();
    let service = Arc::new(ContextService::new(
        definition,
        vec![Arc::clone(&request) as _],
    ));

    // Request scope not active on the submitting thread: capture succeeds
    // and the task runs with the worker's own (absent) value.
    let executor = ManagedExecutor::new(
        ExecutorName::try_new("optional").unwrap(),
        service,
        PolicyExecutorConfig::default(),
    );
    let probe = Arc::clone(&request);
    let handle = executor.submit(move || probe.current()).unwrap();
    assert_eq!(handle.await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scope_is_activated_around_the_task_and_teardown_is_swallowed() {
    let fixture = fixture();
    fixture.application.set_current("AppX");

    let activator = Arc::new(InMemoryScopeActivator::new());
    let executor = ManagedExecutor::new(
        ExecutorName::try_new("scoped").unwrap(),
        Arc::clone(&fixture.service),
        PolicyExecutorConfig::default(),
    )
    .with_scope_activator(Arc::clone(&activator) as _);

    let observed_active = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&observed_active);
    let probe = Arc::clone(&activator);
    let handle = executor
        .submit(move || {
            observed.store(probe.is_active(), Ordering::SeqCst);
        })
        .unwrap();
    handle.await.unwrap();
    assert!(observed_active.load(Ordering::SeqCst));

    // Scope torn down concurrently: deactivation reports AlreadyInactive,
    // which is swallowed; the task's result is unaffected.
    activator.tear_down();
    let handle = executor.submit(|| 5).unwrap();
    assert_eq!(handle.await.unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_scope_deactivation_never_masks_the_result() {
    let fixture = fixture();
    let activator = Arc::new(InMemoryScopeActivator::new());
    activator.fail_deactivation();

    let executor = ManagedExecutor::new(
        ExecutorName::try_new("failing-scope").unwrap(),
        Arc::clone(&fixture.service),
        PolicyExecutorConfig::default(),
    )
    .with_scope_activator(Arc::clone(&activator) as _);

    let handle = executor.submit(|| "result").unwrap();
    assert_eq!(handle.await.unwrap(), "result");
}
