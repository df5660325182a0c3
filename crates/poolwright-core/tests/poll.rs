use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use poolwright_core::retry::{Poll, PollError, RetryPolicy, poll_until, retry_if};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn ready_on_first_probe_does_not_sleep() {
    let start = Instant::now();
    let policy = RetryPolicy::fixed(Duration::from_secs(3), 10);

    let value: u32 = poll_until(&policy, &CancellationToken::new(), |attempt| async move {
        Ok::<_, String>(Poll::Ready(attempt))
    })
    .await
    .unwrap();

    assert_eq!(value, 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn fixed_policy_exhausts_attempt_budget() {
    let start = Instant::now();
    let policy = RetryPolicy::fixed(Duration::from_secs(3), 10);

    let err = poll_until(&policy, &CancellationToken::new(), |_| async {
        Ok::<Poll<()>, String>(Poll::Pending("still there".into()))
    })
    .await
    .unwrap_err();

    match err {
        PollError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 10);
            assert_eq!(last, "still there");
        }
        other => panic!("unexpected error: {other}"),
    }
    // nine sleeps between ten probes
    assert_eq!(start.elapsed(), Duration::from_secs(27));
}

#[tokio::test(start_paused = true)]
async fn exponential_policy_times_out_at_deadline() {
    let start = Instant::now();
    let policy = RetryPolicy::exponential(
        Duration::from_secs(1),
        Duration::from_secs(8),
        Duration::from_secs(30),
    );

    let err = poll_until(&policy, &CancellationToken::new(), |_| async {
        Ok::<Poll<()>, String>(Poll::Pending("scaling".into()))
    })
    .await
    .unwrap_err();

    assert!(matches!(err, PollError::TimedOut { .. }));
    assert_eq!(start.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn probe_error_stops_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::fixed(Duration::from_secs(1), 5);

    let counter = calls.clone();
    let err = poll_until(&policy, &CancellationToken::new(), move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Poll<()>, _>("boom".to_string())
        }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, PollError::Probe(ref e) if e == "boom"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_sleep() {
    let cancel = CancellationToken::new();
    let policy = RetryPolicy::fixed(Duration::from_secs(60), 100);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = poll_until(&policy, &cancel, |_| async {
        Ok::<Poll<()>, String>(Poll::Pending("creating".into()))
    })
    .await
    .unwrap_err();

    assert!(matches!(err, PollError::Cancelled { attempts: 1 }));
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn retry_if_only_retries_accepted_errors() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::fixed(Duration::from_millis(100), 5);

    let counter = calls.clone();
    let result: Result<u32, String> = retry_if(
        &policy,
        move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("503".to_string()) } else { Ok(n) }
            }
        },
        |e| e == "503",
    )
    .await;
    assert_eq!(result.unwrap(), 3);

    let counter = Arc::new(AtomicU32::new(0));
    let seen = counter.clone();
    let result: Result<u32, String> = retry_if(
        &policy,
        move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err("400".to_string())
            }
        },
        |e| e == "503",
    )
    .await;
    assert_eq!(result.unwrap_err(), "400");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
