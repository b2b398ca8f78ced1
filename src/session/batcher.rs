//! Debounced batching of invalidations
//!
//! - The first push of a burst flushes immediately (leading edge).
//! - Later pushes collect into a pending set; the trailing flush fires at
//!   `min(last_push + window, burst_start + max_wait)`.
//! - A trailing flush that carried items starts a fresh burst, so a steady
//!   stream of changes flushes at most once per `max_wait`. A burst ends
//!   once a deadline passes with nothing pending.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

/// Default quiet period before the trailing flush
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
/// Default upper bound on how long a burst can defer a flush
pub const DEFAULT_MAX_WAIT_MS: u64 = 500;

#[derive(Debug, Clone, Copy)]
struct Burst {
    started: Instant,
    last_push: Instant,
}

#[derive(Debug)]
pub struct InvalidationBatcher<T: Ord> {
    window: Duration,
    max_wait: Duration,
    pending: BTreeSet<T>,
    burst: Option<Burst>,
}

impl<T: Ord> InvalidationBatcher<T> {
    pub fn new(window: Duration, max_wait: Duration) -> Self {
        Self {
            window,
            max_wait: max_wait.max(window),
            pending: BTreeSet::new(),
            burst: None,
        }
    }

    /// Add items. Returns a batch to deliver right away when this push opens
    /// a new burst.
    pub fn push<I>(&mut self, items: I, now: Instant) -> Option<Vec<T>>
    where
        I: IntoIterator<Item = T>,
    {
        self.pending.extend(items);
        match self.burst.as_mut() {
            Some(burst) => {
                burst.last_push = now;
                None
            }
            None => {
                self.burst = Some(Burst {
                    started: now,
                    last_push: now,
                });
                self.take_pending()
            }
        }
    }

    /// When the next trailing flush is due
    pub fn deadline(&self) -> Option<Instant> {
        self.burst.map(|burst| {
            (burst.last_push + self.window).min(burst.started + self.max_wait)
        })
    }

    /// Deliver the trailing batch if its deadline has passed
    pub fn poll(&mut self, now: Instant) -> Option<Vec<T>> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        match self.take_pending() {
            Some(batch) => {
                self.burst = Some(Burst {
                    started: now,
                    last_push: now,
                });
                Some(batch)
            }
            None => {
                self.burst = None;
                None
            }
        }
    }

    /// Deliver whatever is pending now and end the burst
    pub fn flush_now(&mut self) -> Option<Vec<T>> {
        self.burst = None;
        self.take_pending()
    }

    /// Drop pending items and end the burst. Returns how many were dropped.
    pub fn cancel(&mut self) -> usize {
        self.burst = None;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn is_idle(&self) -> bool {
        self.burst.is_none()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn take_pending(&mut self) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending).into_iter().collect())
        }
    }
}
