//! Script tests against a live Redis.
//!
//! Skipped unless `SCHEDULER_TEST_REDIS_URL` points at a disposable server,
//! e.g. `SCHEDULER_TEST_REDIS_URL=redis://127.0.0.1:6379/15 cargo test`.

use std::sync::Arc;

use account_scheduler::store::{CoordinationStore, RedisStore};
use account_scheduler::{AccountCandidate, Scheduler, SchedulerConfig};
use futures_util::future::join_all;
use uuid::Uuid;

mod common;

async fn redis_scheduler() -> Option<(Arc<Scheduler>, Arc<RedisStore>)> {
    let url = std::env::var("SCHEDULER_TEST_REDIS_URL").ok()?;
    let mut config: SchedulerConfig = common::test_config();
    config.store.url = url;
    config.store.key_prefix = format!("test-{}", Uuid::new_v4());

    let store = Arc::new(RedisStore::connect(&config.store).await.unwrap());
    let scheduler = Scheduler::new(config, store.clone()).unwrap();
    Some((Arc::new(scheduler), store))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_concurrent_acquire() {
    let Some((scheduler, _)) = redis_scheduler().await else {
        return;
    };

    let tasks = (0..10).map(|i| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .acquire_account_slot(1, &format!("req-{i}"), 3)
                .await
                .unwrap()
        })
    });
    let granted: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();
    assert_eq!(granted.len(), 3);
    assert_eq!(scheduler.account_concurrency(1).await.unwrap(), 3);

    // Re-acquiring a held token refreshes it.
    let holder = granted[0].holder().unwrap().to_string();
    assert!(scheduler.acquire_account_slot(1, &holder, 3).await.unwrap().is_some());
    assert_eq!(scheduler.account_concurrency(1).await.unwrap(), 3);

    for guard in granted {
        guard.release().await;
    }
    assert_eq!(scheduler.account_concurrency(1).await.unwrap(), 0);
}

#[tokio::test]
async fn test_redis_selection() {
    let Some((scheduler, _)) = redis_scheduler().await else {
        return;
    };
    let candidates = vec![
        AccountCandidate::new(1, 2, 10),
        AccountCandidate::new(2, 1, 10),
        AccountCandidate::new(3, 3, 10),
    ];

    let reservation = scheduler.select_account(&candidates, "req-1").await.unwrap().unwrap();
    assert_eq!(reservation.account_id, 2);
    assert_eq!(reservation.concurrency, 1);
    assert_eq!(scheduler.account_concurrency(2).await.unwrap(), 1);

    let full = vec![AccountCandidate::new(2, 0, 1)];
    assert!(scheduler.select_account(&full, "req-2").await.unwrap().is_none());

    reservation.release().await;
    assert_eq!(scheduler.account_concurrency(2).await.unwrap(), 0);
}

#[tokio::test]
async fn test_redis_wait_queue_recovers_total() {
    let Some((scheduler, store)) = redis_scheduler().await else {
        return;
    };
    let wait = scheduler.wait_queue();
    assert!(wait.increment(1, 2).await.unwrap());
    assert!(wait.increment(1, 2).await.unwrap());
    assert!(!wait.increment(1, 2).await.unwrap());
    assert!(wait.increment(2, 2).await.unwrap());
    assert_eq!(wait.total_depth().await.unwrap(), 3);

    // Simulate a lost total key: clear_slots is a plain DEL.
    store.clear_slots(&wait.keys().total).await.unwrap();
    assert_eq!(wait.total_depth().await.unwrap(), 3);

    wait.decrement(1).await.unwrap();
    wait.decrement(1).await.unwrap();
    wait.decrement(1).await.unwrap();
    assert_eq!(wait.total_depth().await.unwrap(), 1);

    wait.decrement(2).await.unwrap();
    assert_eq!(wait.total_depth().await.unwrap(), 0);
}
