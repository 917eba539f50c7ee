//! Deadline and cancellation handling for hardware poll loops.
//!
//! The card executes a list on its own once `ExecuteList` returns; the host
//! only learns about completion by polling. Every poll loop in this crate goes
//! through a [`PollControl`] so callers can bound the wait or abort it from
//! another thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Default poll interval.
pub const DEFAULT_POLL_TICK: Duration = Duration::from_millis(10);

/// Clonable cancellation flag shared between the polling thread and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every loop observing this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Re-arm the token.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Poll interval, optional deadline and cancellation token.
#[derive(Debug, Clone)]
pub struct PollControl {
    tick: Duration,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl Default for PollControl {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_TICK)
    }
}

impl PollControl {
    /// Unbounded polling with the given tick.
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Build from the serializable settings.
    pub fn from_settings(settings: &PollSettings) -> Self {
        let mut control = Self::new(Duration::from_millis(settings.tick_ms));
        if let Some(timeout_ms) = settings.timeout_ms {
            control = control.with_timeout(Duration::from_millis(timeout_ms));
        }
        control
    }

    /// Give every loop a deadline measured from its start.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Observe an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The poll interval.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// The deadline per loop, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The cancellation token observed by loops started from this control.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Start the clock for one poll loop.
    pub fn start(&self) -> PollTimer<'_> {
        PollTimer {
            control: self,
            started: Instant::now(),
        }
    }
}

/// One running poll loop.
#[derive(Debug)]
pub struct PollTimer<'a> {
    control: &'a PollControl,
    started: Instant,
}

impl PollTimer<'_> {
    /// Fail if the loop was cancelled or ran past its deadline.
    pub fn check(&self) -> ScanResult<()> {
        if self.control.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if let Some(timeout) = self.control.timeout {
            let waited = self.started.elapsed();
            if waited > timeout {
                return Err(ScanError::Timeout { waited });
            }
        }
        Ok(())
    }

    /// Sleep one tick, then check deadline and cancellation.
    pub fn wait(&self) -> ScanResult<()> {
        if !self.control.tick.is_zero() {
            std::thread::sleep(self.control.tick);
        }
        self.check()
    }

    /// Time spent in this loop so far.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Serializable poll settings used by the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Poll interval in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Optional deadline per poll loop in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            timeout_ms: None,
        }
    }
}

fn default_tick_ms() -> u64 {
    DEFAULT_POLL_TICK.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let control = PollControl::new(Duration::ZERO).with_cancel_token(token.clone());
        let timer = control.start();
        assert!(timer.check().is_ok());
        token.cancel();
        assert!(matches!(timer.wait(), Err(ScanError::Cancelled)));
        token.reset();
        assert!(timer.check().is_ok());
    }

    #[test]
    fn test_timeout_expires() {
        let control = PollControl::new(Duration::from_millis(2)).with_timeout(Duration::from_millis(1));
        let timer = control.start();
        let err = timer.wait().unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = PollSettings {
            tick_ms: 5,
            timeout_ms: Some(1000),
        };
        let control = PollControl::from_settings(&settings);
        assert_eq!(control.tick(), Duration::from_millis(5));
        assert_eq!(control.timeout(), Some(Duration::from_secs(1)));
    }
}
