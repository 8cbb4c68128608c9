//! Helpers shared by the dmk-session integration tests.

use std::time::Duration;

use dmk_session::DmkConfig;

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, or by the
/// default `[logging] log_level` when unset.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(DmkConfig::default().logging.env_filter())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds, failing the test after one second.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}
