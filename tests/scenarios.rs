//! End-to-end retry scenarios driven through `RetryScheduler`.
//!
//! All timing tests run on paused tokio time, so scheduled delays elapse
//! instantly while their ordering and spacing are preserved.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use eddy::testing::{Permanent, ScriptedUnit, Transient, TransportError};
use eddy::{
    CauseKind, Reporter, RetryError, RetryHandle, RetryPolicy, RetryScheduler, SchedulerConfig,
    Submission, TerminalKind,
};

fn config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_workers(1, 2)
        .with_tick_interval(Duration::from_millis(10))
}

fn started(config: SchedulerConfig) -> RetryScheduler {
    let scheduler = RetryScheduler::new(config).unwrap();
    scheduler.start();
    scheduler
}

fn retrying<T: std::fmt::Debug>(submission: Submission<T>) -> RetryHandle {
    match submission {
        Submission::Retrying(handle) => handle,
        other => panic!("expected a retry, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_fails_once_then_succeeds() {
    let scheduler = started(config());
    let policy = Arc::new(RetryPolicy::from_millis([1000]).unwrap().retry_on::<Transient>());
    let unit = ScriptedUnit::fails_then_succeeds("flaky", 1, || Transient);
    let log = unit.log();

    let handle = retrying(scheduler.execute(unit, policy).await.unwrap());
    let report = handle.wait().await.unwrap();

    assert_eq!(report.attempts, 2);
    let runs = log.instants();
    assert_eq!(runs.len(), 2);
    assert!(runs[1] - runs[0] >= Duration::from_millis(1000));

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_always_fails_until_exhausted() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let reporter = Reporter::new().on_terminal({
        let events = events.clone();
        move |event| {
            events
                .lock()
                .unwrap()
                .push((event.kind, event.attempts, event.cause_kind));
        }
    });
    let scheduler = RetryScheduler::with_reporter(config(), reporter).unwrap();
    scheduler.start();

    let policy = Arc::new(
        RetryPolicy::from_millis([1000, 2000])
            .unwrap()
            .retry_on::<Transient>(),
    );
    let unit = ScriptedUnit::always_fails("down", || Transient);
    let log = unit.log();

    let handle = retrying(scheduler.execute(unit, policy).await.unwrap());
    let err = handle.wait().await.unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 3);
    assert!(err.root_cause().unwrap().is::<Transient>());

    let runs = log.instants();
    assert_eq!(runs.len(), 3);
    assert!(runs[1] - runs[0] >= Duration::from_millis(1000));
    assert!(runs[2] - runs[1] >= Duration::from_millis(2000));

    assert_eq!(
        *events.lock().unwrap(),
        vec![(TerminalKind::Exhausted, 3, Some(CauseKind::of::<Transient>()))]
    );

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_cause_both_retryable_and_excluded_runs_once() {
    let scheduler = started(config());
    let policy = Arc::new(
        RetryPolicy::from_millis([1000, 1000, 1000])
            .unwrap()
            .retry_on::<Transient>()
            .never_retry_on::<Transient>(),
    );
    let unit = ScriptedUnit::always_fails("conflicted", || Transient);
    let log = unit.log();

    let err = scheduler.execute(unit, policy).await.unwrap_err();

    assert!(err.is_non_retryable());
    assert_eq!(err.attempts(), 1);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(log.count(), 1);
    assert!(scheduler.queue().is_empty());

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_full_queue_holds_due_retries() {
    let scheduler = started(config().with_max_queue_size(3));
    let policy = Arc::new(RetryPolicy::from_millis([10]).unwrap().retry_on::<Transient>());

    let mut pending = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let unit = ScriptedUnit::fails_then_succeeds(name, 1, || Transient);
        let log = unit.log();
        let handle = retrying(scheduler.execute(unit, policy.clone()).await.unwrap());
        pending.push((handle, log));
    }
    assert_eq!(scheduler.queue().len(), 4);

    // Every retry is due, but taking one still leaves the queue at its bound.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(scheduler.queue().len(), 4);
    for (_, log) in &pending {
        assert_eq!(log.count(), 1);
    }

    let dropped = scheduler.queue().try_take_lowest().unwrap();
    let dropped_name = dropped.name().to_owned();
    drop(dropped);

    for (handle, log) in pending {
        let unit = handle.unit().to_owned();
        let outcome = handle.wait().await;
        if unit == dropped_name {
            assert!(matches!(outcome, Err(RetryError::Abandoned { .. })));
            assert_eq!(log.count(), 1);
        } else {
            assert_eq!(outcome.unwrap().attempts, 2);
            assert_eq!(log.count(), 2);
        }
    }
    assert!(scheduler.queue().is_empty());

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn executions_never_exceed_schedule_length_plus_one() {
    let scheduler = started(config());
    for retries in 1..=5u64 {
        let policy = Arc::new(
            RetryPolicy::from_millis((1..=retries).map(|i| i * 50))
                .unwrap()
                .retry_on::<Transient>(),
        );
        let unit = ScriptedUnit::always_fails(format!("budget-{}", retries), || Transient);
        let log = unit.log();

        let handle = retrying(scheduler.execute(unit, policy).await.unwrap());
        let err = handle.wait().await.unwrap_err();

        assert!(err.is_exhausted());
        assert_eq!(log.count() as u64, retries + 1);
        assert_eq!(u64::from(err.attempts()), retries + 1);
    }
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn non_retryable_root_cause_executes_exactly_once() {
    let scheduler = started(config());
    let policy = Arc::new(
        RetryPolicy::from_millis([10, 10])
            .unwrap()
            .retry_on::<Transient>()
            .never_retry_on::<Permanent>(),
    );
    let unit = ScriptedUnit::always_fails("wrapped", || TransportError::new(Permanent));
    let log = unit.log();

    let err = scheduler.execute(unit, policy).await.unwrap_err();

    assert!(err.is_non_retryable());
    assert_eq!(log.count(), 1);
    let failure = err.terminal_failure().unwrap();
    assert_eq!(failure.kind, Some(CauseKind::of::<Permanent>()));
    assert!(failure.failure().is::<TransportError>());
    assert!(failure.root_cause().is::<Permanent>());

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn custom_matcher_classifies_io_errors() {
    fn timed_out(cause: &(dyn std::error::Error + 'static)) -> bool {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::TimedOut)
    }

    let scheduler = started(config());
    let policy = Arc::new(
        RetryPolicy::from_millis([20])
            .unwrap()
            .retry_on_kind(CauseKind::matching("io-timeout", timed_out)),
    );
    let unit = ScriptedUnit::fails_then_succeeds("socket", 1, || {
        std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out")
    });

    let handle = retrying(scheduler.execute(unit, policy.clone()).await.unwrap());
    assert_eq!(handle.wait().await.unwrap().attempts, 2);

    let refused = ScriptedUnit::always_fails("refused", || {
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused")
    });
    let err = scheduler.execute(refused, policy).await.unwrap_err();
    assert!(err.is_non_retryable());
    assert_eq!(err.terminal_failure().unwrap().kind, None);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn many_units_retry_concurrently() {
    let scheduler = started(config().with_workers(2, 4).with_promotions_per_tick(4));
    let policy = Arc::new(
        RetryPolicy::from_millis([30, 30])
            .unwrap()
            .retry_on::<Transient>(),
    );

    let mut handles = Vec::new();
    for i in 0..16 {
        let unit = ScriptedUnit::fails_then_succeeds(format!("unit-{}", i), 2, || Transient);
        handles.push(retrying(scheduler.execute(unit, policy.clone()).await.unwrap()));
    }
    for handle in handles {
        assert_eq!(handle.wait().await.unwrap().attempts, 3);
    }
    assert_eq!(scheduler.stats().rejected, 0);

    scheduler.shutdown().await;
}
