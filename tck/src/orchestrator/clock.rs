// Clock Abstraction
//
// The topology rate limiter and the registry read time and sleep through
// this trait, so tests can run them under tokio's paused time.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Clock abstraction trait - everything that spaces operations in time
/// depends on this trait.
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use regnet_tck::orchestrator::clock::{Clock, PausedClock};
///
/// #[tokio::test(start_paused = true)]
/// async fn test_with_paused_time() {
///     let clock = Arc::new(PausedClock);
///     let start = clock.now();
///     clock.advance(Duration::from_millis(500)).await;
///     assert_eq!(clock.now() - start, Duration::from_millis(500));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current instant in time
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Sleeps until `deadline`, returning immediately if it already passed
    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let remaining = deadline.saturating_duration_since(self.now());
        self.sleep(remaining)
    }
}

/// System real-time clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Paused clock (test environment)
///
/// Works with tokio's `time::pause()`: time only advances through
/// [`PausedClock::advance`] or when the runtime is idle and auto-advances
/// to the next pending timer.
///
/// Under `#[tokio::test(start_paused = true)]` build it as the unit value
/// `PausedClock`; otherwise [`PausedClock::new`] pauses the current-thread
/// runtime itself (pausing an already paused runtime panics).
pub struct PausedClock;

impl PausedClock {
    /// Creates a new PausedClock and pauses tokio time
    pub fn new() -> Self {
        time::pause();
        Self
    }

    /// Manually advance time by the specified duration
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_paused_clock_advancement() {
        let clock = Arc::new(PausedClock::new());
        let start = clock.now();

        clock.advance(Duration::from_secs(1)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(1));

        clock.advance(Duration::from_secs(2)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_clock_under_start_paused() {
        let clock = PausedClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(500)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until() {
        let clock = PausedClock;
        let start = clock.now();
        clock.sleep_until(start + Duration::from_millis(250)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(250));

        // Deadline in the past
        clock.sleep_until(start).await;
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_system_clock() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let start = clock.now();

        clock.sleep(Duration::from_millis(10)).await;

        let elapsed = clock.now() - start;
        assert!(elapsed >= Duration::from_millis(10));
    }
}
