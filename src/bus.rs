use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures_util::future::join_all;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    Batch, BatchStatus, Config, DeadLetter, Envelope, Error, EventHandler, EventId, HandlerInfo,
    Metrics, Payload, PublishOptions, Result, SubscribeOptions, SubscriptionId,
    batch::BatchLog,
    dead_letter::{DeadLetterQueue, RetryBackoff, RetryOutcome},
    internal::{Delivery, Dispatcher, EventHistory, Registry, spawn_replayer},
    metrics::{LiveGauges, MetricsRecorder},
    subscription::Registration,
};

/// State shared between the bus façade and the batch replayer task.
pub(crate) struct BusInner<P: Payload> {
    config: Arc<Config>,
    registry: Arc<Registry<P>>,
    history: EventHistory<P>,
    dead_letters: Arc<DeadLetterQueue<P>>,
    metrics: Arc<MetricsRecorder>,
    dispatcher: Dispatcher<P>,
    batches: BatchLog<P>,
    batch_in_progress: AtomicBool,
}

impl<P: Payload> BusInner<P> {
    fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let dead_letters = Arc::new(DeadLetterQueue::new(config.dead_letter_queue_size));
        let metrics = Arc::new(MetricsRecorder::new());
        let dispatcher = Dispatcher::new(
            config.clone(),
            registry.clone(),
            dead_letters.clone(),
            metrics.clone(),
        );
        Self {
            config,
            registry,
            history: EventHistory::new(),
            dead_letters,
            metrics,
            dispatcher,
            batches: BatchLog::new(),
            batch_in_progress: AtomicBool::new(false),
        }
    }

    /// Re-dispatch the trailing `batch_size` envelopes of the history.
    ///
    /// Returns `None` when skipped: history is empty or a previous cycle is
    /// still running. Failures mark the batch as failed and are logged, never
    /// propagated.
    pub(crate) async fn run_batch_cycle(&self) -> Option<BatchStatus> {
        if self.history.is_empty() {
            return None;
        }
        if self.batch_in_progress.swap(true, Ordering::AcqRel) {
            tracing::trace!("Previous batch cycle still running, skipping tick");
            return None;
        }
        let _in_progress = ResetOnDrop(&self.batch_in_progress);

        let events = self.history.tail(self.config.batch_size);
        let batch_id = self.batches.open(events.clone());
        self.batches.set_status(batch_id, BatchStatus::Processing);

        let results = join_all(
            events
                .iter()
                .map(|envelope| self.dispatcher.dispatch(envelope, Delivery::Replay)),
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        let status = if failed == 0 {
            BatchStatus::Completed
        } else {
            tracing::error!(
                batch_id = %batch_id,
                events = events.len(),
                failed,
                "Batch cycle failed"
            );
            BatchStatus::Failed
        };
        self.batches.set_status(batch_id, status);
        Some(status)
    }

    fn clear(&self) {
        self.registry.clear();
        self.history.clear();
        self.batches.clear();
        self.dead_letters.clear();
        self.metrics.reset_active_handlers();
    }
}

struct ResetOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Un-claims dead letters when a retry pass ends, including when its future is dropped.
struct ReleaseOnDrop<'a, P: Payload> {
    queue: &'a DeadLetterQueue<P>,
    ids: Vec<EventId>,
}

impl<P: Payload> Drop for ReleaseOnDrop<'_, P> {
    fn drop(&mut self) {
        self.queue.release(&self.ids);
    }
}

/// In-process publish/subscribe bus for domain events.
///
/// - Register handlers with `subscribe(event_type, handler, options)`.
/// - `publish(event_type, data, options)` validates the event, records it in
///   history and waits until every matching handler has finished.
/// - Failed deliveries land in the dead-letter queue; call
///   `retry_dead_letter_events()` periodically to re-attempt them.
/// - `destroy()` stops the batch replayer and tears the bus down.
///
/// The bus spawns its batch replayer on construction, so [`EventBus::new`]
/// must be called from within a Tokio runtime unless batch replay is
/// disabled (`batch_size <= 1`).
///
/// See also: [`Config`], [`SubscribeOptions`], [`PublishOptions`].
pub struct EventBus<P: Payload> {
    inner: Arc<BusInner<P>>,
    cancel_token: CancellationToken,
    replayer: Option<JoinHandle<()>>,
}

impl<P: Payload> EventBus<P> {
    /// Create a new bus with the given configuration.
    pub fn new(config: Config) -> Self {
        let inner = Arc::new(BusInner::new(config));
        let cancel_token = CancellationToken::new();
        let replayer = inner.config.batch_replay_enabled().then(|| {
            spawn_replayer(
                inner.clone(),
                inner.config.batch_timeout,
                cancel_token.clone(),
            )
        });
        Self {
            inner,
            cancel_token,
            replayer,
        }
    }

    pub fn config(&self) -> &Config {
        self.inner.config.as_ref()
    }

    /// Publish an event and wait for all of its handlers.
    ///
    /// Fails with [`Error::Validation`] before anything is recorded when the
    /// envelope is invalid. When handlers fail, the failed deliveries are
    /// dead-lettered first and then returned as [`Error::Dispatch`].
    pub async fn publish(
        &self,
        event_type: impl Into<Arc<str>>,
        data: P,
        options: PublishOptions,
    ) -> Result<EventId> {
        let envelope = Arc::new(Envelope::new(event_type, data, options));
        envelope.validate()?;

        self.inner.history.push(envelope.clone());
        if self.inner.config.enable_metrics {
            self.inner.metrics.record_published(envelope.event_type());
        }

        self.inner
            .dispatcher
            .dispatch(&envelope, Delivery::Publish)
            .await?;
        Ok(envelope.id())
    }

    /// Publish under the event type the payload declares for itself.
    pub async fn emit(&self, data: P, options: PublishOptions) -> Result<EventId> {
        let event_type = data
            .event_type()
            .ok_or_else(|| Error::validation("payload does not declare an event type"))?;
        self.publish(event_type.as_ref(), data, options).await
    }

    /// Register `handler` for `event_type`.
    ///
    /// Handlers of one type are ordered by descending priority; equal
    /// priorities keep subscription order. Dispatches already in progress are
    /// not affected.
    pub fn subscribe<H>(
        &self,
        event_type: impl Into<Arc<str>>,
        handler: H,
        options: SubscribeOptions<P>,
    ) -> SubscriptionId
    where
        H: EventHandler<P>,
    {
        let registration = Arc::new(Registration::new(
            event_type.into(),
            Arc::new(handler),
            options,
        ));
        let id = registration.id;
        tracing::debug!(
            subscription_id = %id,
            event_type = %registration.event_type,
            priority = registration.priority(),
            once = registration.is_once(),
            "Handler subscribed"
        );
        self.inner.registry.insert(registration);
        self.inner.metrics.handler_added();
        id
    }

    /// Remove one subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.registry.remove(id) {
            Some(registration) => {
                self.inner.metrics.handlers_removed(1);
                tracing::debug!(
                    subscription_id = %id,
                    event_type = %registration.event_type,
                    "Handler unsubscribed"
                );
                true
            }
            None => false,
        }
    }

    /// Remove every subscription of `event_type`, returning how many there were.
    pub fn unsubscribe_all(&self, event_type: &str) -> usize {
        let removed = self.inner.registry.remove_all(event_type);
        self.inner.metrics.handlers_removed(removed);
        if removed > 0 {
            tracing::debug!(event_type, removed, "All handlers unsubscribed");
        }
        removed
    }

    /// Subscriptions of `event_type` in dispatch order.
    pub fn handlers(&self, event_type: &str) -> Vec<HandlerInfo> {
        self.inner.registry.handlers(event_type)
    }

    /// Event types with at least one subscription, sorted.
    pub fn event_types(&self) -> Vec<String> {
        self.inner.registry.event_types()
    }

    pub fn has_handlers(&self, event_type: &str) -> bool {
        self.inner.registry.has_handlers(event_type)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn metrics(&self) -> Metrics {
        let inner = &self.inner;
        inner.metrics.snapshot(LiveGauges {
            registered_handlers: inner.registry.len(),
            in_flight_handlers: inner.dispatcher.gate().in_flight(),
            dead_letter_queue_size: inner.dead_letters.len(),
            last_event_timestamp: inner.history.latest_timestamp(),
        })
    }

    /// Published events, most recent first.
    pub fn event_history(
        &self,
        limit: Option<usize>,
        event_type: Option<&str>,
    ) -> Vec<Arc<Envelope<P>>> {
        self.inner.history.recent(limit, event_type)
    }

    /// Copy of the dead-letter queue, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter<P>> {
        self.inner.dead_letters.entries()
    }

    /// Discard all dead letters, returning how many were dropped.
    pub fn clear_dead_letter_queue(&self) -> usize {
        self.inner.dead_letters.clear()
    }

    /// Re-dispatch every dead letter whose retry time has passed.
    ///
    /// The bus never schedules this itself. Due entries are grouped by event and
    /// each event is dispatched once to every handler currently registered for
    /// it, so handlers that succeeded the first time see the event again. An
    /// entry is resolved when its own subscription succeeds; otherwise it is
    /// rescheduled with exponential backoff, or dropped for good once
    /// `max_retries` failed retries are reached.
    ///
    /// Entries already being retried by a concurrent call are skipped.
    ///
    /// Returns the number of entries retried successfully.
    pub async fn retry_dead_letter_events(&self) -> usize {
        let inner = &self.inner;
        let backoff = RetryBackoff::new(inner.config.retry_delay);
        let claimed = inner.dead_letters.claim_due(Instant::now());
        let _release = ReleaseOnDrop {
            queue: &inner.dead_letters,
            ids: claimed.iter().map(DeadLetter::id).collect(),
        };

        let mut groups: Vec<Vec<DeadLetter<P>>> = Vec::new();
        for entry in claimed {
            match groups
                .iter_mut()
                .find(|group| group[0].event().id() == entry.event().id())
            {
                Some(group) => group.push(entry),
                None => groups.push(vec![entry]),
            }
        }

        let mut retried = 0;
        for group in groups {
            let event = group[0].event().clone();
            let result = inner.dispatcher.dispatch(&event, Delivery::Retry).await;

            for entry in group {
                let failure = match &result {
                    Ok(()) => None,
                    Err(err) if err.failures().is_empty() => Some(err.clone()),
                    Err(err) => err
                        .failures()
                        .iter()
                        .find(|f| f.subscription_id == entry.subscription_id())
                        .map(|f| f.error.clone()),
                };

                let Some(error) = failure else {
                    inner.dead_letters.resolve(entry.id());
                    retried += 1;
                    tracing::debug!(
                        event_id = %event.id(),
                        subscription_id = %entry.subscription_id(),
                        retry_count = entry.retry_count(),
                        "Dead-lettered event delivered"
                    );
                    continue;
                };

                match inner.dead_letters.record_failure(
                    entry.id(),
                    error,
                    inner.config.max_retries,
                    backoff,
                ) {
                    RetryOutcome::Rescheduled { retry_count, at } => tracing::debug!(
                        event_id = %event.id(),
                        subscription_id = %entry.subscription_id(),
                        retry_count,
                        retry_in = ?at.saturating_duration_since(Instant::now()),
                        "Dead-letter retry failed, rescheduled"
                    ),
                    RetryOutcome::Exhausted { retry_count } => tracing::warn!(
                        event_id = %event.id(),
                        event_type = event.event_type(),
                        subscription_id = %entry.subscription_id(),
                        retry_count,
                        "Retries exhausted, dead-lettered event dropped"
                    ),
                    RetryOutcome::Missing => {}
                }
            }
        }
        retried
    }

    /// The most recent batch replay cycles, oldest first.
    pub fn recent_batches(&self) -> Vec<Batch<P>> {
        self.inner.batches.recent()
    }

    /// Drop all subscriptions, history, batch records and dead letters.
    ///
    /// Cumulative counters in [`Metrics`] are kept; the active-handler count
    /// is reset.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Stop the batch replayer, run one final batch cycle and clear the bus.
    pub async fn destroy(mut self) {
        self.cancel_token.cancel();
        if let Some(replayer) = self.replayer.take() {
            if let Err(err) = replayer.await {
                tracing::error!(error = %err, "Batch replayer terminated abnormally");
            }
            self.inner.run_batch_cycle().await;
        }
        self.inner.clear();
        self.inner.dispatcher.gate().close();
        tracing::info!("Event bus destroyed");
    }
}

impl<P: Payload> Default for EventBus<P> {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl<P: Payload> Drop for EventBus<P> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
