//! Graceful-shutdown signals.
#![cfg(unix)]

use std::time::Duration;

use tokio::signal::unix::SignalKind;

use rolekeeper::signal::ShutdownSignals;

#[tokio::test]
async fn sigterm_is_reported_as_shutdown() {
    let mut signals = ShutdownSignals::install().unwrap();
    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let kind = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("SIGTERM was not delivered");
    assert_eq!(kind, SignalKind::terminate());
}
