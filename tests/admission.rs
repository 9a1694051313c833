//! Admission control across concurrent callers and instances.

use std::sync::Arc;
use std::time::Duration;

use account_scheduler::store::MemoryStore;
use account_scheduler::{AccountCandidate, Scheduler};
use futures_util::future::join_all;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_grants_exactly_max() {
    let (a, b, _) = common::instance_pair(common::test_config());

    let tasks = (0..5).map(|i| {
        let scheduler = if i % 2 == 0 { a.clone() } else { b.clone() };
        tokio::spawn(async move {
            scheduler
                .acquire_account_slot(1, &format!("req-{i}"), 3)
                .await
                .unwrap()
        })
    });
    let guards: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let granted: Vec<_> = guards.into_iter().flatten().collect();
    assert_eq!(granted.len(), 3);
    assert_eq!(a.account_concurrency(1).await.unwrap(), 3);
    assert_eq!(b.account_concurrency(1).await.unwrap(), 3);

    for guard in granted {
        guard.release().await;
    }
    assert_eq!(a.account_concurrency(1).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_acquires() {
    let (a, b, _) = common::instance_pair(common::test_config());
    let (max, attempts) = (7u32, 50usize);

    let tasks = (0..attempts).map(|i| {
        let scheduler = if i % 3 == 0 { b.clone() } else { a.clone() };
        tokio::spawn(async move {
            scheduler
                .acquire_user_slot(42, &format!("req-{i}"), max)
                .await
                .unwrap()
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let granted = results.iter().filter(|g| g.is_some()).count();
    assert_eq!(granted, max as usize);
    assert_eq!(a.user_concurrency(42).await.unwrap(), max);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_selection_respects_capacity() {
    let (a, b, _) = common::instance_pair(common::test_config());
    let candidates = Arc::new(vec![
        AccountCandidate::new(1, 0, 4),
        AccountCandidate::new(2, 1, 4),
        AccountCandidate::new(3, 2, 4),
    ]);

    let tasks = (0..30).map(|i| {
        let scheduler = if i % 2 == 0 { a.clone() } else { b.clone() };
        let candidates = candidates.clone();
        tokio::spawn(async move {
            scheduler
                .select_account(&candidates, &format!("req-{i}"))
                .await
                .unwrap()
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let selected: Vec<_> = results.into_iter().flatten().collect();
    assert_eq!(selected.len(), 12);
    for id in 1..=3 {
        assert_eq!(selected.iter().filter(|r| r.account_id == id).count(), 4);
        assert_eq!(a.account_concurrency(id).await.unwrap(), 4);
    }
    assert!(selected.iter().all(|r| r.concurrency <= 4));
}

#[tokio::test]
async fn test_selection_and_direct_slots_agree() {
    let (a, b, _) = common::instance_pair(common::test_config());

    let _direct = a.acquire_account_slot(1, "direct-1", 2).await.unwrap().unwrap();
    let candidates = vec![AccountCandidate::new(1, 0, 2), AccountCandidate::new(2, 5, 2)];

    let first = b.select_account(&candidates, "req-1").await.unwrap().unwrap();
    assert_eq!(first.account_id, 1);
    assert_eq!(first.concurrency, 2);

    // Account 1 is now full through the two paths combined.
    let second = b.select_account(&candidates, "req-2").await.unwrap().unwrap();
    assert_eq!(second.account_id, 2);
    assert!(a.acquire_account_slot(1, "direct-2", 2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreleased_slot_expires_after_ttl() {
    let (scheduler, _, clock) = common::manual_scheduler(common::test_config());
    let ttl = scheduler.slot_ttl();

    let guard = scheduler.acquire_account_slot(5, "crashed", 1).await.unwrap().unwrap();
    std::mem::forget(guard);
    assert!(scheduler.acquire_account_slot(5, "next", 1).await.unwrap().is_none());

    clock.advance(ttl - Duration::from_secs(1));
    assert_eq!(scheduler.account_concurrency(5).await.unwrap(), 1);

    clock.advance(Duration::from_secs(1));
    assert_eq!(scheduler.account_concurrency(5).await.unwrap(), 0);
    assert!(scheduler.acquire_account_slot(5, "next", 1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancelled_request_releases_reservation() {
    let (scheduler, _, _) = common::manual_scheduler(common::test_config());
    let scheduler = Arc::new(scheduler);
    let candidates = vec![AccountCandidate::new(8, 0, 1)];

    let (reserved_tx, reserved_rx) = tokio::sync::oneshot::channel();
    let worker = {
        let scheduler = scheduler.clone();
        let candidates = candidates.clone();
        tokio::spawn(async move {
            let _reservation = scheduler.select_account(&candidates, "req-1").await.unwrap();
            let _ = reserved_tx.send(());
            std::future::pending::<()>().await;
        })
    };

    reserved_rx.await.unwrap();
    assert_eq!(scheduler.account_concurrency(8).await.unwrap(), 1);

    worker.abort();
    let _ = worker.await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.account_concurrency(8).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_queue_total_matches_user_counts() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(common::test_config(), store.clone()).unwrap());

    let tasks = (0..60u64).map(|i| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let user = i % 4 + 1;
            let ticket = scheduler.enter_wait_queue(user).await.unwrap();
            if i % 3 == 0 {
                if let Some(ticket) = ticket {
                    ticket.release().await;
                }
                None
            } else {
                ticket
            }
        })
    });
    let held: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();

    let keys = scheduler.wait_queue().keys().clone();
    let sum: i64 = (1..=4).map(|u| store.wait_count(&keys, &u.to_string())).sum();
    assert_eq!(sum, held.len() as i64);
    assert_eq!(scheduler.wait_queue_depth().await.unwrap(), held.len() as u64);

    // Losing the total key self-heals on the next read.
    store.delete_key(&keys.total);
    assert_eq!(scheduler.wait_queue_depth().await.unwrap(), held.len() as u64);

    for ticket in held {
        ticket.release().await;
    }
    assert_eq!(scheduler.wait_queue_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_wait_queue_user_cap() {
    let mut config = common::test_config();
    config.wait_queue.max_per_user = 2;
    let (scheduler, _, _) = common::manual_scheduler(config);

    let _t1 = scheduler.enter_wait_queue(1).await.unwrap().unwrap();
    let _t2 = scheduler.enter_wait_queue(1).await.unwrap().unwrap();
    assert!(scheduler.enter_wait_queue(1).await.unwrap().is_none());
    assert!(scheduler.enter_wait_queue(2).await.unwrap().is_some());
}
