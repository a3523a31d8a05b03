// tests/shutdown_signal.rs
// Own test binary: it sends SIGTERM to its own process.
#![cfg(unix)]

use fab_tracker::scheduler::cancel_on_shutdown_signal;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn sigterm_cancels_the_token() {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_shutdown_signal(cancel.clone()).expect("install handlers");

    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .expect("run kill");
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
        .await
        .expect("token cancelled by SIGTERM");
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher exits")
        .unwrap();
}

#[tokio::test]
async fn watcher_ends_when_token_is_cancelled_elsewhere() {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_shutdown_signal(cancel.clone()).expect("install handlers");
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher exits")
        .unwrap();
}
