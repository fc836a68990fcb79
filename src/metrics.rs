use std::{collections::HashMap, sync::Mutex, time::Duration};

use tokio::time::Instant;

/// Point-in-time view of the bus, as returned by
/// [`EventBus::metrics`](crate::EventBus::metrics).
///
/// Counters (`total_*`, `events_by_type`, `average_handling_time`) are
/// cumulative and survive [`EventBus::clear`](crate::EventBus::clear). The
/// remaining fields are read live when the snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    pub total_published: u64,
    pub total_handled: u64,
    pub total_errors: u64,
    /// Smoothed handler duration: each successful run moves it halfway
    /// towards that run's duration.
    pub average_handling_time: Duration,
    pub events_by_type: HashMap<String, u64>,
    /// Registrations currently in the registry.
    pub registered_handlers: usize,
    /// Subscribe/unsubscribe balance since the last clear.
    pub active_handlers: usize,
    /// Concurrency gate slots currently held.
    pub in_flight_handlers: usize,
    pub dead_letter_queue_size: usize,
    /// Timestamp of the newest history entry, nanoseconds since Unix epoch.
    pub last_event_timestamp: Option<u64>,
    pub uptime: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    total_published: u64,
    total_handled: u64,
    total_errors: u64,
    average_handling_nanos: f64,
    events_by_type: HashMap<String, u64>,
    active_handlers: usize,
}

/// Live values composed into a [`Metrics`] snapshot.
pub(crate) struct LiveGauges {
    pub registered_handlers: usize,
    pub in_flight_handlers: usize,
    pub dead_letter_queue_size: usize,
    pub last_event_timestamp: Option<u64>,
}

pub(crate) struct MetricsRecorder {
    counters: Mutex<Counters>,
    started_at: Instant,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started_at: Instant::now(),
        }
    }

    pub fn record_published(&self, event_type: &str) {
        let mut c = self.counters.lock().expect("Metrics lock poisoned");
        c.total_published += 1;
        *c.events_by_type.entry(event_type.to_string()).or_default() += 1;
    }

    /// Count a successful handler run.
    ///
    /// The average is updated as `(average + sample) / 2`. That weights recent
    /// samples heavily and is not an arithmetic mean over all runs.
    pub fn record_handled(&self, elapsed: Duration) {
        let mut c = self.counters.lock().expect("Metrics lock poisoned");
        c.total_handled += 1;
        c.average_handling_nanos = (c.average_handling_nanos + elapsed.as_nanos() as f64) / 2.0;
    }

    pub fn record_error(&self) {
        self.counters.lock().expect("Metrics lock poisoned").total_errors += 1;
    }

    pub fn handler_added(&self) {
        self.counters.lock().expect("Metrics lock poisoned").active_handlers += 1;
    }

    pub fn handlers_removed(&self, count: usize) {
        let mut c = self.counters.lock().expect("Metrics lock poisoned");
        c.active_handlers = c.active_handlers.saturating_sub(count);
    }

    pub fn reset_active_handlers(&self) {
        self.counters.lock().expect("Metrics lock poisoned").active_handlers = 0;
    }

    pub fn snapshot(&self, live: LiveGauges) -> Metrics {
        let c = self.counters.lock().expect("Metrics lock poisoned");
        Metrics {
            total_published: c.total_published,
            total_handled: c.total_handled,
            total_errors: c.total_errors,
            average_handling_time: Duration::from_nanos(c.average_handling_nanos as u64),
            events_by_type: c.events_by_type.clone(),
            registered_handlers: live.registered_handlers,
            active_handlers: c.active_handlers,
            in_flight_handlers: live.in_flight_handlers,
            dead_letter_queue_size: live.dead_letter_queue_size,
            last_event_timestamp: live.last_event_timestamp,
            uptime: self.started_at.elapsed(),
        }
    }
}
