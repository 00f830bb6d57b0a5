use std::time::Duration;

use tracing::{error, warn};

use crate::error::Result;

// Attempts made before giving up: one initial call plus three retries.
const DEFAULT_ATTEMPTS: usize = 4;

// Pause between two consecutive attempts.
const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// The retry policy applied around flaky device API calls.
///
/// Attempts are separated by a fixed delay, without backoff and jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a [`RetryPolicy`] with the default number of attempts and the
    /// given delay between them.
    #[must_use]
    #[inline]
    pub const fn with_delay(delay: Duration) -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay,
        }
    }

    /// Returns the total number of attempts.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Returns the delay between two attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

/// Runs an operation until it succeeds or the [`RetryPolicy`] budget is
/// exhausted.
///
/// # Errors
///
/// The error of the last attempt is returned when every attempt fails.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.attempts => {
                error!("Failed to execute after {attempt} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                warn!("Error while executing function, retrying {attempt}: {e}");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::{Error, ErrorKind};

    use super::{RetryPolicy, with_retry};

    const POLICY: RetryPolicy = RetryPolicy::with_delay(Duration::from_millis(1));

    fn flaky_error() -> Error {
        Error::new(ErrorKind::UnexpectedStatus, "Unexpected status code 500")
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 4);
        assert_eq!(policy.delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn succeed_after_two_failures() {
        let calls = AtomicUsize::new(0);

        let value = with_retry(&POLICY, || async {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= 2 { Err(flaky_error()) } else { Ok(call) }
        })
        .await;

        assert_eq!(value, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn always_failing() {
        let calls = AtomicUsize::new(0);

        let value: Result<(), Error> = with_retry(&POLICY, || async {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Err(flaky_error())
        })
        .await;

        assert_eq!(value, Err(flaky_error()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn first_success_is_returned() {
        let calls = AtomicUsize::new(0);

        let value = with_retry(&POLICY, || async {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>("done")
        })
        .await;

        assert_eq!(value, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
