//! Integration tests for supervisor teardown.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use serial_test::serial;

use appvisor::{AppError, AppEvent, AppId};

use super::test_helpers::{launch_passthrough, supervisor};

#[tokio::test]
#[serial]
async fn shutdown_closes_every_worker_once() {
    let sup = supervisor(23400);
    launch_passthrough(&sup, 1).await;
    launch_passthrough(&sup, 2).await;

    let mut events = sup.subscribe();
    sup.shutdown().await;
    sup.shutdown().await;

    let mut terminated = HashSet::new();
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        if let AppEvent::Terminated { id, .. } = event {
            assert!(terminated.insert(id), "each worker is closed once");
        }
    }
    assert_eq!(
        terminated,
        HashSet::from([AppId::Num(1), AppId::Num(2)])
    );
    assert!(sup.list_apps().await.is_empty());
}

#[tokio::test]
#[serial]
async fn operations_after_shutdown_are_refused() {
    let sup = supervisor(23410);
    launch_passthrough(&sup, 1).await;
    sup.shutdown().await;

    assert!(sup.is_closed());
    assert!(!sup.ping_app(1).await);
    assert!(matches!(
        sup.launch_app(2, "flowchart", "passthrough", Vec::new()).await,
        Err(AppError::Closed(_))
    ));
    assert!(matches!(
        sup.message(1, "", "getOutput", Value::Null).await,
        Err(AppError::Closed(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn worker_processes_are_gone_after_shutdown() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let sup = supervisor(23420);
    launch_passthrough(&sup, "x").await;
    let pid = sup.list_apps().await[0].pid.expect("pid");

    sup.shutdown().await;

    let alive = kill(Pid::from_raw(i32::try_from(pid).unwrap()), None).is_ok();
    assert!(!alive, "worker {pid} still running after shutdown");
}

#[tokio::test]
#[serial]
async fn shutdown_of_an_idle_supervisor_is_quick() {
    let sup = supervisor(23430);
    tokio::time::timeout(Duration::from_secs(2), sup.shutdown())
        .await
        .expect("nothing to close");
}
