//! Time helpers for `start_paused` tests

use std::time::Duration;

/// Let every ready task run. With a paused clock nothing else happens: the
/// clock only advances once all tasks are idle, and 1ms is shorter than any
/// engine delay.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Advance the paused clock by `duration`, running everything that falls due
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

pub const HOUR: Duration = Duration::from_secs(3600);
