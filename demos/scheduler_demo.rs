//! Retry Scheduler Example
//!
//! Demonstrates running units of work under retry policies:
//! - A flaky call that recovers after a few retries
//! - A failure that is never retried
//! - A unit that exhausts its schedule
//! - Observing outcomes through reporter hooks
//!
//! Run with: cargo run --example scheduler_demo

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eddy::prelude::*;
use eddy::{Reporter, TerminalKind};

// ==================== Failure kinds ====================

#[derive(Debug)]
struct ServiceBusy;

impl fmt::Display for ServiceBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service busy, try again later")
    }
}

impl std::error::Error for ServiceBusy {}

#[derive(Debug)]
struct InvalidRequest(&'static str);

impl fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid request: {}", self.0)
    }
}

impl std::error::Error for InvalidRequest {}

/// A remote call that reports `ServiceBusy` for its first `busy_for` calls.
fn remote_call(name: &str, busy_for: u32) -> impl RetryableUnit<Output = String> {
    let calls = Arc::new(AtomicU32::new(0));
    let label = name.to_owned();
    FnUnit::new(name, move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let label = label.clone();
        async move {
            println!("  {} call #{}", label, n);
            if n <= busy_for {
                Err::<String, BoxError>(Box::new(ServiceBusy))
            } else {
                Ok(format!("{} answered on call {}", label, n))
            }
        }
    })
}

async fn report<T: fmt::Debug>(label: &str, outcome: Result<Submission<T>, RetryError>) {
    match outcome {
        Ok(Submission::Completed(value)) => println!("{}: first try -> {:?}", label, value),
        Ok(Submission::Retrying(handle)) => match handle.wait().await {
            Ok(report) => println!(
                "{}: recovered after {} attempts in {:?}",
                label, report.attempts, report.elapsed
            ),
            Err(err) => println!("{}: {}", label, err),
        },
        Err(err) => println!("{}: {}", label, err),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let reporter = Reporter::new().on_terminal(|event| {
        if event.kind != TerminalKind::Succeeded {
            println!(
                "  [hook] {} gave up after {} attempts ({:?})",
                event.unit,
                event.attempts,
                event.cause_kind.map(|k| k.name())
            );
        }
    });

    let config = SchedulerConfig::default()
        .with_tick_interval(Duration::from_millis(20))
        .with_workers(2, 4);
    let scheduler = match RetryScheduler::with_reporter(config, reporter) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            eprintln!("bad configuration: {}", err);
            return;
        }
    };
    scheduler.start();

    let policy = match RetryPolicy::from_strategy(
        RetryStrategy::Exponential {
            base: Duration::from_millis(50),
        },
        3,
    ) {
        Ok(policy) => Arc::new(
            policy
                .with_max_delay(Duration::from_millis(300))
                .retry_on::<ServiceBusy>()
                .never_retry_on::<InvalidRequest>(),
        ),
        Err(err) => {
            eprintln!("bad policy: {}", err);
            return;
        }
    };

    println!("\n=== Example 1: Recovers after retries ===");
    let outcome = scheduler
        .execute(remote_call("inventory", 2), policy.clone())
        .await;
    report("inventory", outcome).await;

    println!("\n=== Example 2: Never retried ===");
    let rejected = FnUnit::new("checkout", || async {
        Err::<(), BoxError>(Box::new(InvalidRequest("missing cart id")))
    });
    report("checkout", scheduler.execute(rejected, policy.clone()).await).await;

    println!("\n=== Example 3: Exhausts the schedule ===");
    let outcome = scheduler
        .execute(remote_call("pricing", 10), policy.clone())
        .await;
    report("pricing", outcome).await;

    println!("\n=== Pool ===");
    println!("{:?}", scheduler.stats());

    scheduler.shutdown().await;
}
