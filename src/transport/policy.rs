//! Retry and stall policy for cache transfers
//!
//! Two independent guards keep transfers from hanging:
//! - the socket read timeout (`stall_timeout`) fires when no byte arrives at all
//! - [`StallGuard`] fires when bytes trickle in below `low_speed` for a whole window
//!
//! Both surface as `TimedOut` I/O errors which the transport maps to
//! `TransferOutcome::Timeout`.

use crate::error::LookasideResult;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::time::{Duration, Instant};
use tracing::warn;

/// Time source, injectable so retry schedules can be tested without sleeping
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Growth of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Minimum average throughput over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowSpeedLimit {
    pub bytes_per_sec: u64,
    pub window: Duration,
}

/// What one attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Final, do not retry
    Done(T),
    /// Transient; the value is returned if no attempts remain
    Retry(T),
}

impl<T> Attempt<T> {
    /// Transform the carried value, keeping the retry decision
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempt<U> {
        match self {
            Attempt::Done(v) => Attempt::Done(f(v)),
            Attempt::Retry(v) => Attempt::Retry(f(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
    pub stall_timeout: Duration,
    pub low_speed: Option<LowSpeedLimit>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(60),
            low_speed: Some(LowSpeedLimit {
                bytes_per_sec: 1000,
                window: Duration::from_secs(300),
            }),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `failed_attempt` (1-based)
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        let delay = match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Linear => self.base_delay.saturating_mul(n),
            BackoffKind::Exponential => {
                let factor = 2u32.checked_pow(n - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Run `op` until it reports `Done`, attempts run out, or it errors
    ///
    /// `op` receives the 1-based attempt number. Errors are local failures
    /// and are never retried.
    pub fn run<T>(
        &self,
        clock: &dyn Clock,
        mut op: impl FnMut(u32) -> LookasideResult<Attempt<T>>,
    ) -> LookasideResult<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt)? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(value) if attempt >= attempts => return Ok(value),
                Attempt::Retry(_) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Attempt {}/{} failed, retrying in {:?}",
                        attempt, attempts, delay
                    );
                    clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Reader that fails with `TimedOut` when throughput stays below a limit
pub struct StallGuard<'a, R> {
    inner: R,
    clock: &'a dyn Clock,
    limit: Option<LowSpeedLimit>,
    window_start: Instant,
    window_bytes: u64,
}

impl<'a, R: Read> StallGuard<'a, R> {
    pub fn new(inner: R, clock: &'a dyn Clock, limit: Option<LowSpeedLimit>) -> Self {
        Self {
            inner,
            clock,
            limit,
            window_start: clock.now(),
            window_bytes: 0,
        }
    }
}

impl<R: Read> Read for StallGuard<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let Some(limit) = self.limit else {
            return Ok(n);
        };
        if n == 0 {
            return Ok(0);
        }

        self.window_bytes += n as u64;
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= limit.window {
            let rate = self.window_bytes as f64 / elapsed.as_secs_f64();
            if rate < limit.bytes_per_sec as f64 {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "transfer averaged {:.0} B/s over {:?}, below {} B/s",
                        rate, elapsed, limit.bytes_per_sec
                    ),
                ));
            }
            self.window_start = now;
            self.window_bytes = 0;
        }
        Ok(n)
    }
}

/// Manually advanced clock recording every sleep
#[cfg(test)]
pub(crate) struct FakeClock {
    now: std::sync::Mutex<Instant>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Instant::now()),
            sleeps: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookasideError;

    fn policy(backoff: BackoffKind) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            backoff,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_schedules() {
        let secs = |p: &RetryPolicy| (1..=4).map(|n| p.delay_after(n).as_secs()).collect::<Vec<_>>();
        assert_eq!(secs(&policy(BackoffKind::Fixed)), [1, 1, 1, 1]);
        assert_eq!(secs(&policy(BackoffKind::Linear)), [1, 2, 3, 4]);
        assert_eq!(secs(&policy(BackoffKind::Exponential)), [1, 2, 4, 5]);
    }

    #[test]
    fn exponential_does_not_overflow() {
        let p = policy(BackoffKind::Exponential);
        assert_eq!(p.delay_after(200), Duration::from_secs(5));
    }

    #[test]
    fn retries_until_done() {
        let clock = FakeClock::new();
        let p = policy(BackoffKind::Linear);

        let result = p
            .run(&clock, |attempt| {
                Ok(if attempt < 3 {
                    Attempt::Retry("transient")
                } else {
                    Attempt::Done("ok")
                })
            })
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(clock.sleeps(), [Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn exhausted_retries_return_last_value() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result = policy(BackoffKind::Fixed)
            .run(&clock, |attempt| {
                calls += 1;
                Ok(Attempt::Retry(attempt))
            })
            .unwrap();

        assert_eq!(result, 4);
        assert_eq!(calls, 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn done_is_not_retried() {
        let clock = FakeClock::new();
        let mut calls = 0;
        policy(BackoffKind::Fixed)
            .run(&clock, |_| {
                calls += 1;
                Ok(Attempt::Done(()))
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn errors_are_not_retried() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result: LookasideResult<()> = policy(BackoffKind::Fixed).run(&clock, |_| {
            calls += 1;
            Err(LookasideError::User("disk full".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let clock = FakeClock::new();
        let p = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(p.run(&clock, |_| Ok(Attempt::Retry(7))).unwrap(), 7);
    }

    /// Yields one byte per read and advances the clock by `step` each time
    struct SlowReader<'a> {
        clock: &'a FakeClock,
        step: Duration,
        remaining: usize,
    }

    impl Read for SlowReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.clock.advance(self.step);
            self.remaining -= 1;
            buf[0] = b'x';
            Ok(1)
        }
    }

    #[test]
    fn stall_guard_trips_on_slow_stream() {
        let clock = FakeClock::new();
        let reader = SlowReader {
            clock: &clock,
            step: Duration::from_secs(1),
            remaining: 100,
        };
        let limit = LowSpeedLimit {
            bytes_per_sec: 10,
            window: Duration::from_secs(5),
        };
        let mut guard = StallGuard::new(reader, &clock, Some(limit));

        let err = io::copy(&mut guard, &mut io::sink()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn stall_guard_passes_fast_stream() {
        let clock = FakeClock::new();
        let reader = SlowReader {
            clock: &clock,
            step: Duration::from_millis(10),
            remaining: 1000,
        };
        let limit = LowSpeedLimit {
            bytes_per_sec: 10,
            window: Duration::from_secs(1),
        };
        let mut guard = StallGuard::new(reader, &clock, Some(limit));

        assert_eq!(io::copy(&mut guard, &mut io::sink()).unwrap(), 1000);
    }
}
