// Integration tests for ExecutorPool running dispatches
//
// These tests drive the public API end to end: method resolution, context
// propagation, caller-runs saturation, batch timeouts, monitor re-tuning and
// fail-fast shutdown.
//
// Run with: cargo test -p methodpool --test executor_test

use std::sync::{mpsc, Arc, Barrier, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use methodpool::invoke::{
    CancellationToken, DiagnosticContext, Dispatch, InvokeError, MethodTable, Opaque,
    OperationError, ParamType, Target, Value,
};
use methodpool::pool::{
    BatchStatus, ConfigSource, ExecutorConfig, ExecutorPool, MemorySource, PoolConfig, TaskError,
    CORE_POOL_SIZE_KEY, KEEP_ALIVE_SECS_KEY, MAX_POOL_SIZE_KEY, NO_UPDATE,
};

/// Test target exposing a handful of methods
struct Service {
    started: Mutex<Option<mpsc::Sender<()>>>,
}

impl Service {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(None),
        })
    }

    fn notifying(tx: mpsc::Sender<()>) -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Some(tx)),
        })
    }

    fn notify_started(&self) {
        if let Some(tx) = self.started.lock().unwrap().as_ref() {
            tx.send(()).ok();
        }
    }
}

impl Target for Service {
    fn methods(&self) -> &MethodTable<Self> {
        static TABLE: OnceLock<MethodTable<Service>> = OnceLock::new();
        TABLE.get_or_init(|| {
            MethodTable::<Service>::new()
                .method("add", [ParamType::I32, ParamType::I32], |_, args, _| {
                    Ok(Value::from(args.i32(0)? + args.i32(1)?))
                })
                .variadic("sum", [], ParamType::Number, |_, args, _| {
                    Ok(Value::from(
                        args.list(0)?.iter().filter_map(Value::as_f64).sum::<f64>(),
                    ))
                })
                .variadic("join", [ParamType::Str], ParamType::Str, |_, args, _| {
                    let parts: Vec<&str> =
                        args.list(1)?.iter().filter_map(Value::as_str).collect();
                    Ok(Value::from(parts.join(args.str(0)?)))
                })
                .method("context", [ParamType::Str], |_, args, ctx| {
                    let key = args.str(0)?;
                    let explicit = ctx.diagnostics().get(key).map(str::to_string);
                    let ambient = DiagnosticContext::current().get(key).map(str::to_string);
                    if explicit != ambient {
                        return Err(OperationError::new("explicit and ambient context differ"));
                    }
                    Ok(Value::from(explicit))
                })
                .method("hold", [ParamType::object::<Barrier>()], |service, args, _| {
                    service.notify_started();
                    args.object::<Barrier>(0)?.wait();
                    Ok(Value::Null)
                })
                .method("sleep", [ParamType::I64], |service, args, ctx| {
                    service.notify_started();
                    let until = Instant::now() + Duration::from_millis(args.i64(0)? as u64);
                    while Instant::now() < until {
                        ctx.checkpoint()?;
                        thread::sleep(Duration::from_millis(5));
                    }
                    Ok(Value::Null)
                })
                .method("fail", [], |_, _, _| Err(OperationError::new("boom")))
        })
    }
}

fn pool(name: &str, core: usize, max: usize) -> ExecutorPool {
    let config = ExecutorConfig::new(name).with_pool(
        PoolConfig::new()
            .with_core_size(core)
            .with_max_size(max)
            .with_default_timeout(Duration::from_secs(5)),
    );
    ExecutorPool::new(config).unwrap()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test_log::test]
fn test_submit_resolves_and_runs_method() {
    let pool = pool("submit", 2, 4);
    let dispatch = Dispatch::new(Service::new(), "add", vec![2.into(), 3.into()]);

    let result = pool.submit(dispatch.clone()).wait().unwrap();

    assert_eq!(result, Some(Value::I32(5)));
    assert!(dispatch.succeeded());
    assert_eq!(dispatch.result(), Some(&Value::I32(5)));
}

#[test]
fn test_variadic_dispatches() {
    let pool = pool("variadic", 2, 4);
    let service = Service::new();

    let sum = pool
        .submit(Dispatch::new(
            Arc::clone(&service),
            "sum",
            vec![1.into(), 2.5f64.into(), 3i64.into()],
        ))
        .wait()
        .unwrap();
    assert_eq!(sum, Some(Value::F64(6.5)));

    let empty = pool
        .submit(Dispatch::new(Arc::clone(&service), "sum", vec![]))
        .wait()
        .unwrap();
    assert_eq!(empty, Some(Value::F64(0.0)));

    let joined = pool
        .submit(Dispatch::new(
            service,
            "join",
            vec!["-".into(), "a".into(), "b".into(), "c".into()],
        ))
        .wait()
        .unwrap();
    assert_eq!(joined, Some(Value::from("a-b-c")));
}

#[test]
fn test_resolution_failures_are_surfaced() {
    let pool = pool("failures", 2, 2);

    let missing = Dispatch::new(Service::new(), "missing", vec![]);
    let err = pool.submit(missing.clone()).wait().unwrap_err();
    assert!(matches!(
        err,
        TaskError::Dispatch(InvokeError::MethodNotFound { ref method, arity: 0 }) if method == "missing"
    ));
    assert!(missing.is_complete());
    assert!(!missing.succeeded());

    let wrong_type = Dispatch::new(Service::new(), "add", vec!["2".into(), 3.into()]);
    assert!(matches!(
        pool.submit(wrong_type).wait(),
        Err(TaskError::Dispatch(InvokeError::MethodNotFound { .. }))
    ));

    let failing = Dispatch::new(Service::new(), "fail", vec![]);
    let err = pool.submit(failing.clone()).wait().unwrap_err();
    assert!(err.to_string().contains("fail"));
    assert!(matches!(
        failing.failure(),
        Some(InvokeError::Invocation { source, .. }) if source.message() == "boom"
    ));
}

#[test]
fn test_context_travels_with_dispatch_and_is_cleared() {
    let pool = pool("context", 1, 1);

    DiagnosticContext::clear();
    DiagnosticContext::put("requestId", "r-42");
    let dispatch = Dispatch::new(Service::new(), "context", vec!["requestId".into()]);
    DiagnosticContext::clear();

    let result = pool.submit(dispatch).wait().unwrap();
    assert_eq!(result, Some(Value::from("r-42")));

    assert!(wait_until(Duration::from_secs(2), || pool.stats().active == 0));
    let leftover = pool
        .submit_fn(|_| Ok(DiagnosticContext::current()))
        .wait()
        .unwrap();
    assert!(leftover.is_empty());
}

#[test_log::test]
fn test_saturation_runs_excess_on_caller() {
    let pool = pool("saturation", 2, 3);
    let (started_tx, started_rx) = mpsc::channel();
    let service = Service::notifying(started_tx);
    let barrier = Arc::new(Barrier::new(4));

    let holders: Vec<_> = (0..3)
        .map(|_| {
            pool.submit(Dispatch::new(
                Arc::clone(&service),
                "hold",
                vec![Value::Object(Opaque::from_arc(Arc::clone(&barrier)))],
            ))
        })
        .collect();
    for _ in 0..3 {
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    let caller = thread::current().id();
    for i in 0..2 {
        let overflow = pool.submit_fn(move |_| Ok((i, thread::current().id())));
        assert!(overflow.is_finished());
        assert_eq!(overflow.wait().unwrap(), (i, caller));
    }
    assert_eq!(pool.rejected_count(), 2);
    assert_eq!(pool.stats().pool_size, 3);

    barrier.wait();
    for holder in holders {
        assert_eq!(holder.wait().unwrap(), None);
    }
    assert_eq!(pool.stats().rejected, 2);
}

#[test]
fn test_invoke_all_completes() {
    let pool = pool("batch", 4, 8);
    let service = Service::new();
    let dispatches: Vec<_> = (0..10)
        .map(|i| Dispatch::new(Arc::clone(&service), "add", vec![i.into(), 1.into()]))
        .chain(std::iter::once(Dispatch::new(Arc::clone(&service), "fail", vec![])))
        .collect();

    let outcome = pool.invoke_all_default(&dispatches);

    assert_eq!(outcome.status, BatchStatus::Completed);
    assert_eq!(outcome.total, 11);
    assert_eq!(outcome.completed, 10);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.cancelled, 0);
    for (i, dispatch) in dispatches.iter().take(10).enumerate() {
        assert_eq!(dispatch.result(), Some(&Value::I32(i as i32 + 1)));
    }
}

#[test_log::test]
fn test_invoke_all_respects_timeout() {
    let pool = pool("timeout", 4, 4);
    let service = Service::new();
    let dispatches: Vec<_> = (0..3)
        .map(|_| Dispatch::new(Arc::clone(&service), "sleep", vec![5_000i64.into()]))
        .collect();

    let started = Instant::now();
    let outcome = pool.invoke_all(&dispatches, Duration::from_millis(100));
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, BatchStatus::TimedOut);
    assert_eq!(outcome.cancelled, 3);
    assert_eq!(outcome.completed, 0);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2), "batch took {elapsed:?}");

    // Running dispatches observe the cancellation and record an interruption.
    assert!(wait_until(Duration::from_secs(2), || {
        dispatches.iter().all(|d| d.is_complete())
    }));
    for dispatch in &dispatches {
        assert!(dispatch.failure().is_some_and(InvokeError::is_interrupted));
    }
}

#[test]
fn test_invoke_all_default_uses_updated_timeout() {
    let pool = pool("default-timeout", 2, 2);
    pool.set_default_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(pool.config().default_timeout, Duration::from_millis(100));

    let service = Service::new();
    let dispatches: Vec<_> = (0..2)
        .map(|_| Dispatch::new(Arc::clone(&service), "sleep", vec![5_000i64.into()]))
        .collect();

    let started = Instant::now();
    let outcome = pool.invoke_all_default(&dispatches);
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, BatchStatus::TimedOut);
    assert_eq!(outcome.cancelled, 2);
    assert!(elapsed < Duration::from_secs(2), "batch took {elapsed:?}");
}

#[test]
fn test_invoke_all_with_unbounded_timeout() {
    let pool = pool("unbounded", 2, 2);
    let service = Service::new();
    let dispatches: Vec<_> = (0..4)
        .map(|i| Dispatch::new(Arc::clone(&service), "add", vec![i.into(), 1.into()]))
        .collect();

    let outcome = pool.invoke_all(&dispatches, Duration::MAX);

    assert_eq!(outcome.status, BatchStatus::Completed);
    assert_eq!(outcome.completed, 4);
    assert!(dispatches.iter().all(Dispatch::succeeded));
}

#[test]
fn test_invoke_all_can_be_interrupted() {
    let pool = pool("interrupt", 2, 2);
    let service = Service::new();
    let dispatches: Vec<_> = (0..2)
        .map(|_| Dispatch::new(Arc::clone(&service), "sleep", vec![5_000i64.into()]))
        .collect();

    let interrupt = CancellationToken::new();
    let canceller = {
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupt.cancel();
        })
    };

    let started = Instant::now();
    let outcome = pool.invoke_all_interruptible(&dispatches, Duration::from_secs(30), &interrupt);
    canceller.join().unwrap();

    assert_eq!(outcome.status, BatchStatus::Interrupted);
    assert_eq!(outcome.cancelled, 2);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_stop_resolves_outstanding_handles() {
    let pool = pool("stop", 2, 2);
    let (started_tx, started_rx) = mpsc::channel();
    let service = Service::notifying(started_tx);

    let dispatch = Dispatch::new(service, "sleep", vec![10_000i64.into()]);
    let handle = pool.submit(dispatch.clone());
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    pool.stop();

    assert!(matches!(handle.wait(), Err(TaskError::ShutDown)));
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert!(wait_until(Duration::from_secs(2), || dispatch.is_complete()));
    assert!(dispatch.failure().is_some_and(InvokeError::is_interrupted));

    let late = pool.submit(Dispatch::new(Service::new(), "add", vec![1.into(), 1.into()]));
    assert!(matches!(late.wait(), Err(TaskError::ShutDown)));
}

#[test_log::test]
fn test_monitor_retunes_from_source() {
    let source = Arc::new(MemorySource::new());
    let config = ExecutorConfig::new("tuned")
        .with_pool(PoolConfig::new().with_core_size(2).with_max_size(4))
        .with_monitor_interval(Duration::from_millis(20));
    let pool =
        ExecutorPool::with_source(config, Arc::clone(&source) as Arc<dyn ConfigSource>).unwrap();
    pool.start().unwrap();

    // Sentinels leave the configuration untouched.
    source.set(CORE_POOL_SIZE_KEY, NO_UPDATE);
    source.set(MAX_POOL_SIZE_KEY, NO_UPDATE);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(pool.config().core_size, 2);
    assert_eq!(pool.config().max_size, 4);

    source.set(KEEP_ALIVE_SECS_KEY, 30);
    source.set(MAX_POOL_SIZE_KEY, 12);
    source.set(CORE_POOL_SIZE_KEY, 6);
    assert!(wait_until(Duration::from_secs(5), || {
        let config = pool.config();
        config.core_size == 6 && config.max_size == 12
    }));
    assert_eq!(pool.config().keep_alive, Duration::from_secs(30));

    // An invalid combination is ignored as a whole.
    source.set(CORE_POOL_SIZE_KEY, 20);
    source.set(MAX_POOL_SIZE_KEY, NO_UPDATE);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(pool.config().core_size, 6);

    pool.stop();
    assert!(!pool.is_running());
}

#[test]
fn test_keep_alive_shrinks_to_core() {
    let config = ExecutorConfig::new("shrink").with_pool(
        PoolConfig::new()
            .with_core_size(1)
            .with_max_size(4)
            .with_keep_alive(Duration::from_secs(1)),
    );
    let pool = ExecutorPool::new(config).unwrap();
    let barrier = Arc::new(Barrier::new(5));
    let (started_tx, started_rx) = mpsc::channel();
    let service = Service::notifying(started_tx);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            pool.submit(Dispatch::new(
                Arc::clone(&service),
                "hold",
                vec![Value::Object(Opaque::from_arc(Arc::clone(&barrier)))],
            ))
        })
        .collect();
    for _ in 0..4 {
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(pool.stats().pool_size, 4);

    barrier.wait();
    for handle in handles {
        handle.wait().unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || pool.stats().pool_size == 1));
    assert_eq!(pool.stats().largest, 4);
}
