//! Deadline races with paused time.

use std::future;
use std::time::Duration;

use gatekeep_core::{BoundedWait, RaceError};

#[tokio::test(start_paused = true)]
async fn hung_operation_times_out_at_deadline() {
    let wait = BoundedWait::from_millis(50);
    let started = tokio::time::Instant::now();

    let err = wait
        .race("model lookup", future::pending::<anyhow::Result<Option<()>>>())
        .await
        .unwrap_err();

    assert!(matches!(err, RaceError::TimedOut { .. }));
    assert_eq!(err.to_string(), "model lookup timed out after 50ms");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(60));
}

#[tokio::test(start_paused = true)]
async fn timer_is_released_after_success() {
    let wait = BoundedWait::from_millis(50);
    let value = wait
        .race("model lookup", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, anyhow::Error>(Some("ready"))
        })
        .await
        .unwrap();

    assert_eq!(value, "ready");
    assert_eq!(wait.armed_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_races_settle_independently() {
    let wait = BoundedWait::from_millis(50);
    let races = (0..4u64).map(|i| {
        let wait = wait.clone();
        async move {
            wait.race("lookup", async move {
                tokio::time::sleep(Duration::from_millis(i * 30)).await;
                Ok::<_, anyhow::Error>(Some(i))
            })
            .await
        }
    });

    let results = futures_util::future::join_all(races).await;
    let settled: Vec<Option<u64>> = results.into_iter().map(Result::ok).collect();
    assert_eq!(settled, vec![Some(0), Some(1), None, None]);
    assert_eq!(wait.armed_timers(), 0);
}
