use std::future::Future;
use std::time::Duration;

/// Exponential backoff policy shared by everything that retries.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.max(1.0).powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Outcome of a retried operation that gave up.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `f` until it succeeds, `retryable` rejects the error, or the attempt
/// budget is spent. Returns the value and the number of attempts used.
pub async fn retry_async<F, Fut, T, E, R>(
    config: &BackoffConfig,
    retryable: R,
    mut f: F,
) -> Result<(T, u32), Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match f(attempt).await {
            Ok(v) => return Ok((v, attempt)),
            Err(e) => {
                if attempt >= max_attempts || !retryable(&e) {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                let delay = config.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> BackoffConfig {
        BackoffConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let cfg = fast();
        assert_eq!(cfg.delay_after(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_after(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_after(3), Duration::from_millis(400));
        assert_eq!(cfg.delay_after(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let result = retry_async(&fast(), |_: &&str| true, |_| async { Ok::<_, &str>(42) }).await;
        let (v, attempts) = result.unwrap();
        assert_eq!(v, 42);
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retries_with_growing_delay() {
        let counter = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = retry_async(&fast(), |_: &&str| true, |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), (3, 3));
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let result: Result<((), u32), _> =
            retry_async(&fast(), |_: &&str| true, |_| async { Err("always") }).await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, "always");
    }

    #[tokio::test]
    async fn non_retryable_stops_immediately() {
        let result: Result<((), u32), _> =
            retry_async(&fast(), |_: &&str| false, |_| async { Err("fatal") }).await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
