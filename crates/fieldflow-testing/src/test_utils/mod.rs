//! Async helpers for reading subscriptions in tests.
//!
//! Subscriptions never end on their own while the store lives, so every
//! helper here is bounded by a timeout instead of waiting forever.

use std::time::Duration;

use fieldflow_core::Subscription;

/// Default per-item wait used by tests
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Next item, or `None` if the subscription ended or nothing arrived in time.
pub async fn recv_timeout<T>(sub: &mut Subscription<T>, timeout: Duration) -> Option<T> {
    tokio::time::timeout(timeout, sub.recv()).await.ok().flatten()
}

/// Collect up to `n` items, stopping early if the subscription ends or
/// `timeout` elapses overall.
pub async fn collect_n<T>(sub: &mut Subscription<T>, n: usize, timeout: Duration) -> Vec<T> {
    let mut items = Vec::with_capacity(n);
    let deadline = tokio::time::Instant::now() + timeout;
    while items.len() < n {
        match tokio::time::timeout_at(deadline, sub.recv()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) | Err(_) => break,
        }
    }
    items
}

/// Assert that nothing is delivered for `quiet`.
pub async fn assert_silent<T: std::fmt::Debug>(sub: &mut Subscription<T>, quiet: Duration) {
    if let Ok(Some(item)) = tokio::time::timeout(quiet, sub.recv()).await {
        panic!("expected no delivery, got {:?}", item);
    }
}

/// Assert with retry logic
///
/// Re-evaluates the condition every 50ms. The condition may `.await`.
#[macro_export]
macro_rules! assert_eventually {
    ($condition:expr, $max_attempts:expr $(,)?) => {{
        let mut attempts = 0;
        loop {
            if $condition {
                break;
            }
            if attempts >= $max_attempts {
                panic!(
                    "Condition `{}` did not become true after {} attempts",
                    stringify!($condition),
                    $max_attempts
                );
            }
            attempts += 1;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }};
}
