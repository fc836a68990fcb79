//! Bounded store of failed deliveries and their retry bookkeeping.
//!
//! An entry is created when a handler fails or times out during a publish or
//! batch replay. [`EventBus::retry_dead_letter_events`](crate::EventBus::retry_dead_letter_events)
//! re-dispatches entries whose retry time has passed. Each failed retry pushes
//! the next attempt further out (`retry_delay * 2^retry_count`) until
//! `max_retries` is reached and the entry is dropped for good.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::time::Instant;

use crate::{Envelope, Error, EventId, Payload, SubscriptionId, meta::new_id};

/// Upper bound for a single backoff step.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponential retry schedule: `base * 2^retry_count`, capped at [`MAX_RETRY_DELAY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub base: Duration,
}

impl RetryBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Delay before the next attempt of an entry with `retry_count` failed retries.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
    }
}

/// A failed delivery awaiting retry.
#[derive(Debug, Clone)]
pub struct DeadLetter<P: Payload> {
    id: EventId,
    event: Arc<Envelope<P>>,
    subscription_id: SubscriptionId,
    error: Error,
    retry_count: u32,
    first_failed_at: Instant,
    last_failed_at: Instant,
    next_retry_at: Instant,
    retrying: bool,
}

impl<P: Payload> DeadLetter<P> {
    pub(crate) fn new(
        event: Arc<Envelope<P>>,
        subscription_id: SubscriptionId,
        error: Error,
        backoff: RetryBackoff,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: new_id(),
            event,
            subscription_id,
            error,
            retry_count: 0,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: now + backoff.delay(0),
            retrying: false,
        }
    }

    /// Identity of this entry (distinct from the event id).
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event(&self) -> &Arc<Envelope<P>> {
        &self.event
    }

    /// Registration whose failure created the entry.
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Most recent failure.
    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn first_failed_at(&self) -> Instant {
        self.first_failed_at
    }

    pub fn last_failed_at(&self) -> Instant {
        self.last_failed_at
    }

    pub fn next_retry_at(&self) -> Instant {
        self.next_retry_at
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_retry_at <= now
    }
}

/// What happened to an entry after a failed retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryOutcome {
    Rescheduled { retry_count: u32, at: Instant },
    Exhausted { retry_count: u32 },
    /// The entry was evicted or cleared while the retry ran.
    Missing,
}

/// FIFO ring of dead letters.
pub(crate) struct DeadLetterQueue<P: Payload> {
    entries: Mutex<VecDeque<DeadLetter<P>>>,
    capacity: usize,
}

impl<P: Payload> DeadLetterQueue<P> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Store an entry, evicting the oldest one when full. Returns the evicted entry.
    pub fn push(&self, entry: DeadLetter<P>) -> Option<DeadLetter<P>> {
        if self.capacity == 0 {
            return Some(entry);
        }
        let mut entries = self.entries.lock().expect("DeadLetterQueue lock poisoned");
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(entry);
        evicted
    }

    /// Mark every due entry that is not already being retried as in flight and
    /// return copies of them. Claimed entries stay in the queue until resolved,
    /// rescheduled or released.
    pub fn claim_due(&self, now: Instant) -> Vec<DeadLetter<P>> {
        let mut entries = self.entries.lock().expect("DeadLetterQueue lock poisoned");
        entries
            .iter_mut()
            .filter(|e| !e.retrying && e.is_due(now))
            .map(|e| {
                e.retrying = true;
                e.clone()
            })
            .collect()
    }

    pub fn release(&self, ids: &[EventId]) {
        let mut entries = self.entries.lock().expect("DeadLetterQueue lock poisoned");
        for entry in entries.iter_mut().filter(|e| ids.contains(&e.id)) {
            entry.retrying = false;
        }
    }

    /// Remove an entry after a successful retry.
    pub fn resolve(&self, id: EventId) -> bool {
        let mut entries = self.entries.lock().expect("DeadLetterQueue lock poisoned");
        match entries.iter().position(|e| e.id == id) {
            Some(index) => entries.remove(index).is_some(),
            None => false,
        }
    }

    /// Count a failed retry, then reschedule or drop the entry.
    pub fn record_failure(
        &self,
        id: EventId,
        error: Error,
        max_retries: u32,
        backoff: RetryBackoff,
    ) -> RetryOutcome {
        let mut entries = self.entries.lock().expect("DeadLetterQueue lock poisoned");
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return RetryOutcome::Missing;
        };
        let now = Instant::now();
        let entry = &mut entries[index];
        entry.retry_count += 1;
        entry.retrying = false;
        entry.error = error;
        entry.last_failed_at = now;
        let retry_count = entry.retry_count;

        if retry_count >= max_retries {
            entries.remove(index);
            return RetryOutcome::Exhausted { retry_count };
        }
        entry.next_retry_at = now + backoff.delay(retry_count);
        RetryOutcome::Rescheduled {
            retry_count,
            at: entry.next_retry_at,
        }
    }

    pub fn entries(&self) -> Vec<DeadLetter<P>> {
        let entries = self.entries.lock().expect("DeadLetterQueue lock poisoned");
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("DeadLetterQueue lock poisoned")
            .len()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().expect("DeadLetterQueue lock poisoned");
        let count = entries.len();
        entries.clear();
        count
    }
}
