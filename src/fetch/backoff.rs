use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Attempt budget, delay schedule, and optional cancellation shared by the
/// feed fetcher and the chain RPC client.
#[derive(Clone, Copy)]
pub(crate) struct RetryPolicy<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryPolicy<'a> {
    /// Same delay between every attempt.
    pub(crate) fn fixed(delay: Duration, max_attempts: usize) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            max_attempts: max_attempts.max(1),
            cancellation: None,
        }
    }

    /// Delay doubles after each failed attempt, capped at `max_delay`.
    pub(crate) fn exponential(
        initial_delay: Duration,
        max_delay: Duration,
        max_attempts: usize,
    ) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            max_attempts: max_attempts.max(1),
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: Option<&'a CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Terminal outcome of a failed retry loop.
#[derive(Debug)]
pub(crate) enum RetryError<E> {
    /// The classifier refused to retry this error.
    Aborted(E),
    /// Every attempt in the budget failed; carries the last failure.
    Exhausted { attempts: usize, last: E },
    Cancelled,
}

pub(crate) async fn retry_with_backoff<'a, T, E, F, Fut, L, C>(
    policy: RetryPolicy<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    L: FnMut(usize, Duration, &E),
    C: FnMut(usize, &E) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;

        if policy
            .cancellation
            .is_some_and(|token| token.is_cancelled())
        {
            return Err(RetryError::Cancelled);
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let RetryDisposition::Abort = classify_error(attempt, &err) {
            return Err(RetryError::Aborted(err));
        }

        if attempt >= policy.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        on_retry(attempt, delay, &err);

        if !sleep_with_cancellation(delay, policy.cancellation).await {
            return Err(RetryError::Cancelled);
        }
        delay = next_delay(delay, policy.max_delay);
    }
}

/// Returns `false` when the token fired before the delay elapsed.
async fn sleep_with_cancellation(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return true;
    }

    match cancellation {
        Some(token) => tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        },
        None => {
            sleep(delay).await;
            true
        }
    }
}

fn next_delay(current: Duration, max_delay: Duration) -> Duration {
    if current.is_zero() {
        return max_delay.min(Duration::from_millis(1));
    }
    current.saturating_mul(2).min(max_delay)
}
