use std::time::{Duration, Instant};

use crate::RemiError;

/// Bounded retry policy for operations that can fail transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The wall-clock window in which attempts are repeated.
    pub window: Duration,

    /// Waits longer than this are reported as diagnostics.
    pub long_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(100),
            long_wait: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy with the given retry window.
    pub fn with_window(self, window: Duration) -> Self {
        Self { window, ..self }
    }

    /// Creates a new policy with the given long wait threshold.
    pub fn with_long_wait(self, long_wait: Duration) -> Self {
        Self { long_wait, ..self }
    }

    /// Runs `attempt` until it succeeds, fails with a non-transient error, or
    /// the window elapses.
    ///
    /// The processor is yielded between attempts. On success, returns the
    /// value together with the time spent before the successful attempt
    /// completed. When the window elapses, the last [`RemiError::Busy`] is
    /// returned and it is up to the caller to turn it into a timeout.
    pub fn run<T>(
        &self,
        mut attempt: impl FnMut() -> Result<T, RemiError>,
    ) -> Result<(T, Duration), RemiError> {
        let start = Instant::now();

        loop {
            match attempt() {
                Ok(value) => return Ok((value, start.elapsed())),
                Err(err) if err.is_busy() && start.elapsed() < self.window => {
                    std::thread::yield_now();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn first_attempt() -> Result<(), RemiError> {
        let (value, wait) = RetryPolicy::default().run(|| Ok(42))?;
        assert_eq!(value, 42);
        assert!(wait < Duration::from_millis(100));
        Ok(())
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let attempts = Cell::new(0);
        let result = RetryPolicy::default().run(|| -> Result<(), RemiError> {
            attempts.set(attempts.get() + 1);
            Err(RemiError::NoSuchProcess)
        });

        assert!(matches!(result, Err(RemiError::NoSuchProcess)));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn busy_until_window_elapses() {
        let policy = RetryPolicy::default().with_window(Duration::from_millis(20));
        let start = Instant::now();
        let result = policy.run(|| -> Result<(), RemiError> { Err(RemiError::Busy) });

        assert!(matches!(result, Err(RemiError::Busy)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
