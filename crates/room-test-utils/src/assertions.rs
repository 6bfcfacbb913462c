//! Polling helpers for state that settles asynchronously.

use room_client::{RoomView, SessionState};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Default bound for eventual assertions.
pub const EVENTUALLY: Duration = Duration::from_secs(5);

/// Poll `check` every 20ms until it returns true; panic after `timeout`.
pub async fn assert_eventually<F, Fut>(timeout: Duration, what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}: {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the session state satisfies `predicate`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    predicate: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    let outcome = tokio::time::timeout(EVENTUALLY, rx.wait_for(predicate))
        .await
        .map(|r| r.map(|state| state.clone()));
    match outcome {
        Ok(Ok(state)) => state,
        Ok(Err(_)) => panic!("session dropped while waiting for state"),
        Err(_) => panic!("state not reached, last: {:?}", *rx.borrow()),
    }
}

/// Wait until the room view satisfies `predicate`.
pub async fn wait_for_view(
    rx: &mut watch::Receiver<RoomView>,
    predicate: impl FnMut(&RoomView) -> bool,
) -> RoomView {
    let outcome = tokio::time::timeout(EVENTUALLY, rx.wait_for(predicate))
        .await
        .map(|r| r.map(|view| view.clone()));
    match outcome {
        Ok(Ok(view)) => view,
        Ok(Err(_)) => panic!("session dropped while waiting for view"),
        Err(_) => panic!("view not reached, last: {:?}", *rx.borrow()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_assert_eventually_polls_until_true() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        assert_eventually(EVENTUALLY, "third poll", move || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[should_panic(expected = "condition not met")]
    async fn test_assert_eventually_panics_on_timeout() {
        assert_eventually(Duration::from_millis(50), "never", || async { false }).await;
    }
}
