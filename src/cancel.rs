//! Cancellation-aware waiting.
//!
//! Every suspension point in the crate goes through [`cancellable`], so a
//! fired [`CancellationToken`] always wins over a pending wait. Cleanup of
//! anything acquired before the wait is left to the caller's RAII guards.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{CoordinationError, Result};

/// Races `fut` against `token`. Cancellation is checked first, so an already
/// cancelled token never lets a ready future slip through.
pub async fn cancellable<F>(token: &CancellationToken, fut: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CoordinationError::OperationCancelled),
        output = fut => Ok(output),
    }
}

/// Sleeps for `delay` unless `token` fires first.
pub async fn pause(token: &CancellationToken, delay: Duration) -> Result<()> {
    cancellable(token, tokio::time::sleep(delay)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_future_completes() {
        let token = CancellationToken::new();
        assert_eq!(cancellable(&token, async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_future() {
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            cancellable(&token, async { 7 }).await,
            Err(CoordinationError::OperationCancelled)
        );
    }

    #[tokio::test]
    async fn pause_unblocks_on_cancel() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = pause(&token, Duration::from_secs(30)).await;
        assert_eq!(outcome, Err(CoordinationError::OperationCancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
