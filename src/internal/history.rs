use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use crate::{Envelope, Payload};

pub(crate) const HISTORY_CAPACITY: usize = 10_000;
/// Entries dropped in one sweep once the capacity is exceeded.
pub(crate) const HISTORY_TRIM: usize = 1_000;

/// Published envelopes, oldest first.
pub(crate) struct EventHistory<P: Payload> {
    entries: Mutex<VecDeque<Arc<Envelope<P>>>>,
}

impl<P: Payload> EventHistory<P> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, envelope: Arc<Envelope<P>>) {
        let mut entries = self.entries.lock().expect("EventHistory lock poisoned");
        entries.push_back(envelope);
        if entries.len() > HISTORY_CAPACITY {
            entries.drain(..HISTORY_TRIM);
        }
    }

    /// Most recent first, optionally restricted to one event type.
    pub fn recent(&self, limit: Option<usize>, event_type: Option<&str>) -> Vec<Arc<Envelope<P>>> {
        let entries = self.entries.lock().expect("EventHistory lock poisoned");
        entries
            .iter()
            .rev()
            .filter(|e| event_type.is_none_or(|t| e.event_type() == t))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// The last `n` envelopes in publish order.
    pub fn tail(&self, n: usize) -> Vec<Arc<Envelope<P>>> {
        let entries = self.entries.lock().expect("EventHistory lock poisoned");
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn latest_timestamp(&self) -> Option<u64> {
        let entries = self.entries.lock().expect("EventHistory lock poisoned");
        entries.back().map(|e| e.timestamp())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("EventHistory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("EventHistory lock poisoned")
            .clear();
    }
}
