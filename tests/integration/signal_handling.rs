use std::time::Duration;

use lead_harvester::shutdown::ShutdownCoordinator;

#[tokio::test]
async fn shutdown_notifies_concurrent_waiters() {
    let shutdown = ShutdownCoordinator::shared();

    let waiters: Vec<_> = (0..10)
        .map(|_| {
            let handle = shutdown.clone();
            tokio::spawn(async move { handle.wait_for_shutdown().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "a waiter was not notified of shutdown");
    }
}

/// A request made before anyone waits must not be lost
#[tokio::test]
async fn shutdown_requested_before_wait_is_seen() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move { handle.wait_for_shutdown().await });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() hung after shutdown was requested");
    assert!(shutdown.is_shutdown_requested());
}
