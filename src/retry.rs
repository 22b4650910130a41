use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use tracing::{debug, warn};

/// Shared teardown signal for long-running work.
///
/// Waiting on the token is interruptible: `sleep` returns as soon as
/// `cancel` is called from any thread.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                wake_tx,
                wake_rx,
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.inner.wake_tx.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks for `delay` unless cancelled first. Returns `true` when cancelled.
    pub fn sleep(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        if delay.is_zero() {
            return false;
        }
        match self.inner.wake_rx.recv_timeout(delay) {
            Ok(()) => {
                // re-arm for any other waiter
                let _ = self.inner.wake_tx.try_send(());
                true
            }
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("cancelled")]
    Cancelled,
}

/// Bounded retry with capped exponential backoff and random jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1200),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(350),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// `min(base * 2^attempt, cap)`, before jitter. `attempt` is zero-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter.is_zero() {
            return backoff;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        backoff + Duration::from_millis(extra)
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent.
    ///
    /// The closure receives the zero-based attempt number. The last error is
    /// returned unchanged inside [`RetryError::Exhausted`].
    pub fn execute<T, E, F>(&self, cancel: &CancelToken, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: fmt::Display,
    {
        let attempts = self.attempts();
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let made = attempt + 1;
                    if made >= attempts {
                        warn!(attempts = made, error = %err, "retry budget exhausted");
                        return Err(RetryError::Exhausted {
                            attempts: made,
                            last: err,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    debug!(attempt = made, ?delay, error = %err, "attempt failed, backing off");
                    if cancel.sleep(delay) {
                        return Err(RetryError::Cancelled);
                    }
                    attempt = made;
                }
            }
        }
    }
}
