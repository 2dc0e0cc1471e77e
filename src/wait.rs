//! Delay primitives for timeout and retry loops.

use std::future::Future;
use std::time::Duration;

/// Suspends the current task for `duration`.
pub async fn wait(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Polls `check` every `interval` until it yields a value or `timeout` elapses.
///
/// The first check runs immediately. Returns `None` on timeout.
pub async fn wait_until<T, F, Fut>(interval: Duration, timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let poll = async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            wait(interval).await;
        }
    };

    tokio::time::timeout(timeout, poll).await.ok()
}
