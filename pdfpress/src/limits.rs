//! Bounds on concurrent compression work.
//!
//! Each compression runs an external process, so an unbounded burst of uploads means an unbounded
//! number of Ghostscript processes. The limiter caps how many run at once and how long a request
//! may queue for a slot before it is turned away with HTTP 429.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::LimitsConfig;
use crate::errors::{Error, Result};

/// Container for all resource limiters.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// Limiter for concurrent compressions. None means unlimited.
    pub compressions: Option<Arc<CompressionLimiter>>,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            compressions: CompressionLimiter::new(config).map(Arc::new),
        }
    }

    /// Wait for a compression slot. Without a limiter this returns immediately.
    pub async fn acquire_compression(&self) -> Result<Option<CompressionPermit>> {
        match &self.compressions {
            Some(limiter) => limiter.acquire().await.map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug)]
pub struct CompressionLimiter {
    semaphore: Arc<Semaphore>,
    /// Current number of requests waiting for a permit
    waiting_count: AtomicUsize,
    /// Maximum allowed waiting requests (None = unlimited)
    max_waiting: Option<usize>,
    max_wait: Duration,
}

const BUSY: &str = "The server is busy compressing other documents. Please try again in a moment.";

fn busy(message: impl Into<String>) -> Error {
    Error::TooManyRequests { message: message.into() }
}

/// A place in the waiting queue, given back when dropped.
///
/// Tying the count to a guard keeps it right when the waiting request is cancelled (the client
/// disconnects) rather than finishing.
struct QueueSlot<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CompressionLimiter {
    /// Returns `None` when `max_concurrent_compressions` is 0 (unlimited).
    pub fn new(config: &LimitsConfig) -> Option<Self> {
        if config.max_concurrent_compressions == 0 {
            return None;
        }

        Some(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_compressions)),
            waiting_count: AtomicUsize::new(0),
            max_waiting: (config.max_waiting_compressions != 0).then_some(config.max_waiting_compressions),
            max_wait: config.max_wait,
        })
    }

    /// Number of requests currently queued for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting_count.load(Ordering::SeqCst)
    }

    fn join_queue(&self) -> Option<QueueSlot<'_>> {
        self.waiting_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| match self.max_waiting {
                Some(max) if waiting >= max => None,
                _ => Some(waiting + 1),
            })
            .ok()
            .map(|_| QueueSlot {
                waiting: &self.waiting_count,
            })
    }

    /// Acquire a slot, queueing for up to `max_wait` if all slots are busy.
    ///
    /// Fails with `TooManyRequests` if the queue is full or no slot frees up in time.
    pub async fn acquire(&self) -> Result<CompressionPermit> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(CompressionPermit { _permit: permit });
        }
        if self.max_wait.is_zero() {
            return Err(busy(BUSY));
        }

        let Some(_slot) = self.join_queue() else {
            debug!(waiting = self.waiting(), "Compression queue full");
            return Err(busy(BUSY));
        };

        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(CompressionPermit { _permit: permit }),
            Ok(Err(_)) => Err(busy("Compression is not available right now. Please try again later.")),
            Err(_) => Err(busy(format!(
                "No compression slot became free within {}s. Please try again in a moment.",
                self.max_wait.as_secs().max(1)
            ))),
        }
    }
}

/// Releases the compression slot when dropped.
#[must_use]
pub struct CompressionPermit {
    _permit: OwnedSemaphorePermit,
}
