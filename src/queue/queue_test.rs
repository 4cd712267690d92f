use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;

use super::*;

fn queue() -> Arc<WorkQueue<&'static str>> {
    Arc::new(WorkQueue::new(Box::new(ItemExponentialFailureRateLimiter::new(
        Duration::from_millis(10),
        Duration::from_secs(1),
    ))))
}

#[tokio::test]
async fn test_duplicate_adds_coalesce() {
    let q = queue();
    q.add("a");
    q.add("a");
    q.add("b");

    assert_eq!(q.len(), 2);
    assert_eq!(q.get().await, Some("a"));
    assert_eq!(q.get().await, Some("b"));
    assert!(q.is_empty());
}

#[tokio::test]
async fn test_item_in_flight_is_not_handed_out_twice() {
    let q = queue();
    q.add("a");
    let item = q.get().await.unwrap();

    q.add("a");
    assert_eq!(q.len(), 0, "re-added item must wait for done");

    q.done(&item);
    assert_eq!(q.len(), 1);
    assert_eq!(q.get().await, Some("a"));
}

#[tokio::test]
async fn test_done_without_readd_does_not_requeue() {
    let q = queue();
    q.add("a");
    let item = q.get().await.unwrap();
    q.done(&item);

    assert!(q.is_empty());
}

#[tokio::test]
async fn test_get_wakes_on_add() {
    let q = queue();
    let waiter = {
        let q = q.clone();
        tokio::spawn(async move { q.get().await })
    };

    tokio::task::yield_now().await;
    q.add("late");

    let got = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(got, Some("late"));
}

#[tokio::test]
async fn test_shut_down_releases_waiters_and_rejects_adds() {
    let q = queue();
    let waiter = {
        let q = q.clone();
        tokio::spawn(async move { q.get().await })
    };
    tokio::task::yield_now().await;

    q.shut_down();
    q.add("a");

    assert!(q.is_shutting_down());
    assert_eq!(waiter.await.unwrap(), None);
    assert!(q.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_add_after_waits_for_delay() {
    let q = queue();
    q.add_after("a", Duration::from_secs(1));
    // Second delayed add keeps the first deadline
    q.add_after("a", Duration::from_secs(5));

    sleep(Duration::from_millis(500)).await;
    assert!(q.is_empty());

    sleep(Duration::from_millis(501)).await;
    assert_eq!(q.len(), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(q.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_add_rate_limited_backs_off_per_item() {
    let q = queue();

    q.add_rate_limited("a");
    q.add_rate_limited("b");
    assert_eq!(q.num_requeues(&"a"), 1);

    sleep(Duration::from_millis(11)).await;
    assert_eq!(q.len(), 2);
    let a = q.get().await.unwrap();
    q.done(&a);

    q.add_rate_limited("a");
    assert_eq!(q.num_requeues(&"a"), 2);

    q.forget(&"a");
    assert_eq!(q.num_requeues(&"a"), 0);
}
