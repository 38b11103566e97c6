//! Reconnection strategies for the WebSocket client
//!
//! When the socket drops, the client asks its strategy how long to wait
//! before the next attempt. Attempts are counted from 0 since the last
//! successful connection; `None` means give up.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `0` for the first attempt, then
//!   `min(base * 2^attempt, max)` (default base 1 s, max 30 s)
//! - **FixedDelay**: Constant delay between attempts
//! - **NoReconnect**: Never reconnect
//! - **CustomDelay**: Any `Fn(u32) -> Duration`
//!
//! # Examples
//!
//! ```rust
//! use eden_client::ws::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::default();
//! assert_eq!(backoff.next_delay(0), Some(Duration::ZERO));
//! assert_eq!(backoff.next_delay(1), Some(Duration::from_secs(2)));
//! assert_eq!(backoff.next_delay(10), Some(Duration::from_secs(30)));
//! ```

use std::time::Duration;

/// Decides the delay before each reconnection attempt
///
/// The strategy may keep state across attempts; `reset` is called after a
/// successful connection.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed), or `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Forget accumulated state after a successful connection
    fn reset(&mut self);
}

/// Exponential backoff with optional attempt cap and jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
            current_attempt: 0,
        }
    }

    /// Give up after `max_attempts` attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add a random 0-25% to every non-zero delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_secs(30))
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        self.current_attempt = attempt;

        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        if attempt == 0 {
            return Some(Duration::ZERO);
        }

        let max = self.max_delay.as_millis() as u64;
        let delay = 2u64
            .checked_pow(attempt)
            .and_then(|factor| (self.base_delay.as_millis() as u64).checked_mul(factor))
            .map_or(max, |delay| delay.min(max));

        if self.jitter {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4));
            return Some(Duration::from_millis(delay + jitter_ms));
        }
        Some(Duration::from_millis(delay))
    }

    fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Same delay before every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn reset(&mut self) {}
}

/// Never reconnect
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}

/// Delay computed by a caller-supplied function; never gives up
pub struct CustomDelay<F>(pub F);

impl<F> ReconnectionStrategy for CustomDelay<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        Some((self.0)(attempt))
    }

    fn reset(&mut self) {}
}
