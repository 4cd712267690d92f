use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use super::async_task::join_tasks;
use super::async_task::spawn_task;
use super::time::age;
use super::time::now_unix_secs;
use super::time::unix_secs;
use crate::Error;
use crate::SystemError;

#[test]
fn test_now_unix_secs_is_reasonable() {
    assert!(now_unix_secs() > 1_609_459_200); // after 2021-01-01
}

#[test]
fn test_unix_secs_before_epoch_is_zero() {
    let before = UNIX_EPOCH - Duration::from_secs(10);
    assert_eq!(unix_secs(before), 0);
    assert_eq!(unix_secs(UNIX_EPOCH + Duration::from_secs(42)), 42);
}

#[test]
fn test_age_clamps_future_creation_to_zero() {
    let now = SystemTime::now();
    assert_eq!(age(now + Duration::from_secs(60), now), Duration::ZERO);
    assert_eq!(age(now - Duration::from_secs(60), now), Duration::from_secs(60));
}

#[tokio::test]
async fn test_spawn_task_tracks_handle() {
    let ran = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    let flag = ran.clone();
    spawn_task(
        "flag",
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        },
        Some(&mut handles),
    );

    assert_eq!(handles.len(), 1);
    for h in handles {
        h.await.unwrap();
    }
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_join_tasks_reports_panicked_task() {
    let ok = tokio::spawn(async {});
    let panicked = tokio::spawn(async { panic!("worker blew up") });

    let err = join_tasks(vec![ok, panicked]).await.unwrap_err();
    match err {
        Error::System(SystemError::TaskFailed(e)) => assert!(e.is_panic()),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_join_tasks_waits_for_all() {
    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let slow = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.store(true, Ordering::SeqCst);
    });

    join_tasks(vec![slow]).await.unwrap();
    assert!(done.load(Ordering::SeqCst));
}
