use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use crate::{
    Envelope, EventId, Payload,
    meta::{new_id, now_nanos},
};

/// Batch records kept for [`EventBus::recent_batches`](crate::EventBus::recent_batches).
pub const BATCH_LOG_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "pending"),
            BatchStatus::Processing => write!(f, "processing"),
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Record of one batch replay cycle.
///
/// Purely observational: nothing in the bus waits on or reacts to a batch's
/// status.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "P: serde::Serialize",
        deserialize = "P: serde::de::DeserializeOwned"
    ))
)]
pub struct Batch<P: Payload> {
    id: EventId,
    events: Vec<Arc<Envelope<P>>>,
    created_at: u64,
    processed_at: Option<u64>,
    status: BatchStatus,
}

impl<P: Payload> Batch<P> {
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Envelopes replayed by this cycle, in publish order.
    pub fn events(&self) -> &[Arc<Envelope<P>>] {
        &self.events
    }

    /// Nanoseconds since Unix epoch.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<u64> {
        self.processed_at
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }
}

/// Most recent batch records, oldest first.
pub(crate) struct BatchLog<P: Payload> {
    batches: Mutex<VecDeque<Batch<P>>>,
}

impl<P: Payload> BatchLog<P> {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a new pending batch.
    pub fn open(&self, events: Vec<Arc<Envelope<P>>>) -> EventId {
        let batch = Batch {
            id: new_id(),
            events,
            created_at: now_nanos(),
            processed_at: None,
            status: BatchStatus::Pending,
        };
        let id = batch.id;
        let mut batches = self.batches.lock().expect("BatchLog lock poisoned");
        if batches.len() >= BATCH_LOG_CAPACITY {
            batches.pop_front();
        }
        batches.push_back(batch);
        id
    }

    pub fn set_status(&self, id: EventId, status: BatchStatus) {
        let mut batches = self.batches.lock().expect("BatchLog lock poisoned");
        if let Some(batch) = batches.iter_mut().find(|b| b.id == id) {
            batch.status = status;
            if matches!(status, BatchStatus::Completed | BatchStatus::Failed) {
                batch.processed_at = Some(now_nanos());
            }
        }
    }

    pub fn recent(&self) -> Vec<Batch<P>> {
        let batches = self.batches.lock().expect("BatchLog lock poisoned");
        batches.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.batches.lock().expect("BatchLog lock poisoned").clear();
    }
}
