//! Integration tests for the work queue.

use config_getter::model::ResourceKey;
use config_getter::queue::WorkQueue;
use config_getter::queue::rate_limiter::ItemExponentialRateLimiter;
use std::time::Duration;
use tokio::time::timeout;

fn test_queue() -> WorkQueue {
    WorkQueue::new(ItemExponentialRateLimiter::new(
        Duration::from_millis(5),
        Duration::from_secs(1),
    ))
}

fn key(name: &str) -> ResourceKey {
    ResourceKey::new("default", name)
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_adds_are_collapsed() {
    let queue = test_queue();

    queue.add(key("a"));
    queue.add(key("a"));
    queue.add(key("b"));

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.get().await, Some(key("a")));
    assert_eq!(queue.get().await, Some(key("b")));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn add_while_processing_requeues_once_after_done() {
    let queue = test_queue();

    queue.add(key("a"));
    let got = queue.get().await.unwrap();

    // Two adds while in flight: neither is handed out yet.
    queue.add(key("a"));
    queue.add(key("a"));
    assert!(queue.is_empty());

    queue.done(&got);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().await, Some(key("a")));
    queue.done(&key("a"));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn done_without_readd_does_not_requeue() {
    let queue = test_queue();

    queue.add(key("a"));
    let got = queue.get().await.unwrap();
    queue.done(&got);

    assert!(queue.is_empty());
}

#[tokio::test]
async fn concurrent_producers_queue_one_pass() {
    let queue = test_queue();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let q = queue.clone();
        handles.push(tokio::spawn(async move { q.add(key("shared")) }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(queue.len(), 1);
}

// ---------------------------------------------------------------------------
// Blocking and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_waits_for_add() {
    let queue = test_queue();

    let q = queue.clone();
    let waiter = tokio::spawn(async move { q.get().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    queue.add(key("late"));
    let got = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(got, Some(key("late")));
}

#[tokio::test]
async fn shutdown_wakes_blocked_getters() {
    let queue = test_queue();

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let q = queue.clone();
        waiters.push(tokio::spawn(async move { q.get().await }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.shutdown();

    for waiter in waiters {
        let got = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got, None);
    }
}

#[tokio::test]
async fn shutdown_drains_pending_keys_first() {
    let queue = test_queue();

    queue.add(key("a"));
    queue.add(key("b"));
    queue.shutdown();

    assert_eq!(queue.get().await, Some(key("a")));
    assert_eq!(queue.get().await, Some(key("b")));
    assert_eq!(queue.get().await, None);
}

#[tokio::test]
async fn shutdown_only_takes_effect_once() {
    let queue = test_queue();

    assert!(queue.shutdown());
    assert!(!queue.shutdown());
    assert!(queue.is_shutting_down());
    assert_eq!(queue.get().await, None);
}

#[tokio::test]
async fn add_after_shutdown_is_ignored() {
    let queue = test_queue();

    queue.shutdown();
    queue.add(key("a"));
    queue.add_rate_limited(key("b"));

    assert!(queue.is_shutting_down());
    assert!(queue.is_empty());
    assert_eq!(queue.get().await, None);
}

// ---------------------------------------------------------------------------
// Rate-limited retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_rate_limited_counts_and_redelivers() {
    let queue = test_queue();
    let k = key("flaky");

    queue.add_rate_limited(k.clone());
    assert_eq!(queue.num_requeues(&k), 1);

    let got = timeout(Duration::from_secs(1), queue.get()).await.unwrap();
    assert_eq!(got, Some(k.clone()));
    queue.done(&k);

    queue.add_rate_limited(k.clone());
    assert_eq!(queue.num_requeues(&k), 2);

    queue.forget(&k);
    assert_eq!(queue.num_requeues(&k), 0);
}

#[tokio::test]
async fn rate_limited_add_is_delayed() {
    let queue = WorkQueue::new(ItemExponentialRateLimiter::new(
        Duration::from_millis(200),
        Duration::from_secs(1),
    ));

    queue.add_rate_limited(key("slow"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.is_empty(), "key must not be delivered before its delay");

    let got = timeout(Duration::from_secs(2), queue.get()).await.unwrap();
    assert_eq!(got, Some(key("slow")));
}

#[tokio::test]
async fn shutdown_cancels_pending_delayed_adds() {
    let queue = WorkQueue::new(ItemExponentialRateLimiter::new(
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    ));

    queue.add_rate_limited(key("never"));
    queue.shutdown();

    let got = timeout(Duration::from_secs(1), queue.get()).await.unwrap();
    assert_eq!(got, None);
}

#[tokio::test]
async fn add_after_zero_is_immediate() {
    let queue = test_queue();

    queue.add_after(key("now"), Duration::ZERO);

    assert_eq!(queue.len(), 1);
}
