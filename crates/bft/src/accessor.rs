//! Retry-aware chain data access.
//!
//! Failures are classified so callers can react differently:
//!
//! - **NoBlock**: the header does not exist (yet). Retried with a bounded
//!   policy in case the backend is lagging, then surfaced.
//! - **MalformedExtra**: the header exists but its extra data does not decode.
//!   Permanent, returned immediately, never retried.
//! - **DeadlineExceeded**: the caller's deadline would expire before the next
//!   attempt.

use crate::config::RetryPolicy;
use crate::storage::BlockchainBackend;
use favo_types::{BlockNumber, Extra, ExtraError, Header};
#[cfg(any(test, feature = "test-utils"))]
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Classified chain read failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessorError {
    #[error("block {0} not found")]
    NoBlock(BlockNumber),

    #[error("block {number} has malformed extra data: {source}")]
    MalformedExtra {
        number: BlockNumber,
        #[source]
        source: ExtraError,
    },

    #[error("deadline expired while waiting for block {0}")]
    DeadlineExceeded(BlockNumber),
}

impl AccessorError {
    /// "Not decidable yet" rather than "broken".
    pub fn is_no_block(&self) -> bool {
        matches!(self, AccessorError::NoBlock(_))
    }

    /// Retrying can never change the outcome.
    pub fn is_permanent(&self) -> bool {
        matches!(self, AccessorError::MalformedExtra { .. })
    }
}

/// Time source for retry waits.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock; `sleep` blocks the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock that advances instantly and records every wait.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
        self.sleeps.lock().push(duration);
    }
}

/// Fetches headers with decoded extra data from a [`BlockchainBackend`].
#[derive(Clone)]
pub struct ChainAccessor {
    backend: Arc<dyn BlockchainBackend>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ChainAccessor {
    pub fn new(backend: Arc<dyn BlockchainBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Same backend and clock with a different retry policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            policy,
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn backend(&self) -> &Arc<dyn BlockchainBackend> {
        &self.backend
    }

    /// Header and decoded extra for `number`.
    ///
    /// Blocks the caller for at most `(max_attempts - 1) * delay`.
    pub fn get_block_data(&self, number: BlockNumber) -> Result<(Header, Extra), AccessorError> {
        self.fetch(number, None)
    }

    /// Like [`Self::get_block_data`], but gives up instead of waiting past `deadline`.
    pub fn get_block_data_before(
        &self,
        number: BlockNumber,
        deadline: Instant,
    ) -> Result<(Header, Extra), AccessorError> {
        self.fetch(number, Some(deadline))
    }

    fn fetch(
        &self,
        number: BlockNumber,
        deadline: Option<Instant>,
    ) -> Result<(Header, Extra), AccessorError> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(header) = self.backend.header_by_number(number) {
                let extra = header
                    .extra()
                    .map_err(|source| AccessorError::MalformedExtra { number, source })?;
                return Ok((header, extra));
            }

            if attempt == attempts {
                break;
            }
            if let Some(deadline) = deadline {
                if self.clock.now() + self.policy.delay > deadline {
                    debug!(number, attempt, "Deadline reached before next block lookup");
                    return Err(AccessorError::DeadlineExceeded(number));
                }
            }
            trace!(number, attempt, delay = ?self.policy.delay, "Block not found, retrying");
            self.clock.sleep(self.policy.delay);
        }
        Err(AccessorError::NoBlock(number))
    }
}

impl std::fmt::Debug for ChainAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainAccessor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
