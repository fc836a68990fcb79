use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use futures_util::{FutureExt, future::join_all};
use tokio::time::Instant;

use super::{ConcurrencyGate, Registry};
use crate::{
    Config, Envelope, Error, HandlerFailure, Payload, Result,
    dead_letter::{DeadLetter, DeadLetterQueue, RetryBackoff},
    metrics::MetricsRecorder,
    subscription::Registration,
};

/// Why an envelope is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Publish,
    Replay,
    /// Dead-letter retry. Failures update the existing entry instead of adding new ones.
    Retry,
}

impl Delivery {
    fn as_str(&self) -> &'static str {
        match self {
            Delivery::Publish => "publish",
            Delivery::Replay => "replay",
            Delivery::Retry => "retry",
        }
    }
}

/// Fans one envelope out to every registration of its type.
pub(crate) struct Dispatcher<P: Payload> {
    config: Arc<Config>,
    registry: Arc<Registry<P>>,
    gate: ConcurrencyGate,
    dead_letters: Arc<DeadLetterQueue<P>>,
    metrics: Arc<MetricsRecorder>,
}

impl<P: Payload> Dispatcher<P> {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry<P>>,
        dead_letters: Arc<DeadLetterQueue<P>>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            gate: ConcurrencyGate::new(config.gate_size()),
            config,
            registry,
            dead_letters,
            metrics,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Deliver `envelope` to a snapshot of its registrations and wait for all of them.
    ///
    /// Registrations start in priority order, each behind one gate slot, and
    /// run concurrently. Every failure is collected; one failing handler never
    /// stops its siblings.
    pub async fn dispatch(&self, envelope: &Arc<Envelope<P>>, delivery: Delivery) -> Result<()> {
        let registrations = self.registry.snapshot(envelope.event_type());
        if registrations.is_empty() {
            tracing::trace!(event_type = envelope.event_type(), "No handlers registered");
            return Ok(());
        }

        let total = registrations.len();
        tracing::debug!(
            event_id = %envelope.id(),
            event_type = envelope.event_type(),
            handlers = total,
            delivery = delivery.as_str(),
            "Dispatching event"
        );

        let outcomes = join_all(registrations.into_iter().map(|registration| async move {
            let result = self
                .gate
                .run(self.execute(&registration, envelope, delivery))
                .await
                .and_then(|outcome| outcome);
            (registration.id, result)
        }))
        .await;

        let failures: Vec<HandlerFailure> = outcomes
            .into_iter()
            .filter_map(|(subscription_id, result)| {
                result.err().map(|error| HandlerFailure {
                    subscription_id,
                    error,
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Dispatch {
                event_type: envelope.event_type_arc().clone(),
                total,
                failures,
            })
        }
    }

    async fn execute(
        &self,
        registration: &Registration<P>,
        envelope: &Arc<Envelope<P>>,
        delivery: Delivery,
    ) -> Result<()> {
        let prepared = match prepare(registration, envelope) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Ok(()),
            Err(err) => return Err(self.fail(registration, envelope, err, delivery)),
        };

        if !registration.claim() {
            // once-subscription already fired, or is firing in another dispatch
            return Ok(());
        }

        let started = Instant::now();
        match self.invoke(registration, prepared).await {
            Ok(()) => {
                if self.config.enable_metrics {
                    self.metrics.record_handled(started.elapsed());
                }
                if registration.is_once() && self.registry.remove(registration.id).is_some() {
                    self.metrics.handlers_removed(1);
                    tracing::debug!(
                        subscription_id = %registration.id,
                        event_type = %registration.event_type,
                        "Once subscription removed after first delivery"
                    );
                }
                Ok(())
            }
            Err(err) => {
                registration.release();
                Err(self.fail(registration, envelope, err, delivery))
            }
        }
    }

    /// Poll the handler in place, raced against the registration's timeout.
    ///
    /// The first poll happens here, so handlers start in the order `dispatch`
    /// reaches them. When the timeout wins, the unfinished future is moved to
    /// its own task and keeps running; only its result is discarded.
    async fn invoke(&self, registration: &Registration<P>, envelope: Arc<Envelope<P>>) -> Result<()> {
        let timeout = registration
            .options
            .timeout
            .unwrap_or(self.config.handler_timeout);

        let future = catch_unwind(AssertUnwindSafe(|| registration.handler.handle(envelope)))
            .map_err(|payload| Error::HandlerPanicked(panic_message(payload)))?;
        let mut running = AssertUnwindSafe(future).catch_unwind().boxed();

        match tokio::time::timeout(timeout, &mut running).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(Error::HandlerPanicked(panic_message(payload))),
            Err(_) => {
                tokio::spawn(running);
                Err(Error::HandlerTimeout(timeout))
            }
        }
    }

    /// Count and log a failure, and dead-letter it unless this is a retry.
    fn fail(
        &self,
        registration: &Registration<P>,
        envelope: &Arc<Envelope<P>>,
        error: Error,
        delivery: Delivery,
    ) -> Error {
        if self.config.enable_metrics {
            self.metrics.record_error();
        }
        tracing::warn!(
            event_id = %envelope.id(),
            event_type = envelope.event_type(),
            subscription_id = %registration.id,
            delivery = delivery.as_str(),
            error = %error,
            "Handler failed"
        );

        if self.config.enable_dead_letter_queue && delivery != Delivery::Retry {
            let entry = DeadLetter::new(
                envelope.clone(),
                registration.id,
                error.clone(),
                RetryBackoff::new(self.config.retry_delay),
            );
            if let Some(dropped) = self.dead_letters.push(entry) {
                tracing::warn!(
                    event_id = %dropped.event().id(),
                    event_type = dropped.event().event_type(),
                    "Dead-letter queue full, dropped oldest entry"
                );
            }
        }
        error
    }
}

/// Apply the filter and transform hooks. `Ok(None)` means filtered out.
fn prepare<P: Payload>(
    registration: &Registration<P>,
    envelope: &Arc<Envelope<P>>,
) -> Result<Option<Arc<Envelope<P>>>> {
    let options = &registration.options;
    if let Some(filter) = &options.filter {
        let accepted = catch_unwind(AssertUnwindSafe(|| filter(envelope)))
            .map_err(|payload| Error::HandlerPanicked(panic_message(payload)))?;
        if !accepted {
            tracing::trace!(subscription_id = %registration.id, "Event filtered out");
            return Ok(None);
        }
    }

    match &options.transform {
        Some(transform) => catch_unwind(AssertUnwindSafe(|| transform(envelope)))
            .map(|transformed| Some(Arc::new(transformed)))
            .map_err(|payload| Error::HandlerPanicked(panic_message(payload))),
        None => Ok(Some(envelope.clone())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> Arc<str> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Arc::from(*s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Arc::from(s.as_str())
    } else {
        Arc::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PublishOptions, SubscribeOptions, handler};
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[derive(Clone, Debug)]
    struct Count(u32);
    impl Payload for Count {}

    struct Fixture {
        dispatcher: Dispatcher<Count>,
        registry: Arc<Registry<Count>>,
        dead_letters: Arc<DeadLetterQueue<Count>>,
        metrics: Arc<MetricsRecorder>,
    }

    fn fixture(config: Config) -> Fixture {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let dead_letters = Arc::new(DeadLetterQueue::new(config.dead_letter_queue_size));
        let metrics = Arc::new(MetricsRecorder::new());
        Fixture {
            dispatcher: Dispatcher::new(
                config,
                registry.clone(),
                dead_letters.clone(),
                metrics.clone(),
            ),
            registry,
            dead_letters,
            metrics,
        }
    }

    fn subscribe<H: crate::EventHandler<Count>>(
        registry: &Registry<Count>,
        handler: H,
        options: SubscribeOptions<Count>,
    ) -> crate::SubscriptionId {
        let reg = Arc::new(Registration::new("count".into(), Arc::new(handler), options));
        let id = reg.id;
        registry.insert(reg);
        id
    }

    fn envelope(n: u32) -> Arc<Envelope<Count>> {
        Arc::new(Envelope::new("count", Count(n), PublishOptions::default()))
    }

    #[tokio::test]
    async fn test_no_handlers_is_noop() {
        let f = fixture(Config::default());
        assert!(f.dispatcher.dispatch(&envelope(1), Delivery::Publish).await.is_ok());
        assert_eq!(f.dead_letters.len(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_aggregated_and_dead_lettered() {
        let f = fixture(Config::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        subscribe(
            &f.registry,
            handler::sync(move |_: &Envelope<Count>| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::default(),
        );
        let failing = subscribe(
            &f.registry,
            handler::sync(|_: &Envelope<Count>| Err(Error::external("smtp down"))),
            SubscribeOptions::default(),
        );

        let err = f
            .dispatcher
            .dispatch(&envelope(1), Delivery::Publish)
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].subscription_id, failing);

        let letters = f.dead_letters.entries();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].subscription_id(), failing);
        assert_eq!(f.metrics.snapshot(gauges()).total_errors, 1);
        assert_eq!(f.metrics.snapshot(gauges()).total_handled, 1);
    }

    #[tokio::test]
    async fn test_retry_delivery_does_not_dead_letter() {
        let f = fixture(Config::default());
        subscribe(
            &f.registry,
            handler::sync(|_: &Envelope<Count>| Err(Error::external("still down"))),
            SubscribeOptions::default(),
        );
        assert!(f.dispatcher.dispatch(&envelope(1), Delivery::Retry).await.is_err());
        assert_eq!(f.dead_letters.len(), 0);
    }

    #[tokio::test]
    async fn test_disabled_dead_letter_queue() {
        let f = fixture(Config::default().with_dead_letter_queue(false));
        subscribe(
            &f.registry,
            handler::sync(|_: &Envelope<Count>| Err(Error::external("boom"))),
            SubscribeOptions::default(),
        );
        assert!(f.dispatcher.dispatch(&envelope(1), Delivery::Publish).await.is_err());
        assert_eq!(f.dead_letters.len(), 0);
    }

    #[tokio::test]
    async fn test_panicking_hooks_and_handlers_are_isolated() {
        let f = fixture(Config::default());
        subscribe(
            &f.registry,
            handler::sync(|_: &Envelope<Count>| panic!("handler exploded")),
            SubscribeOptions::default(),
        );
        subscribe(
            &f.registry,
            handler::sync(|_: &Envelope<Count>| Ok(())),
            SubscribeOptions::default()
                .with_filter(|_: &Envelope<Count>| panic!("filter exploded")),
        );
        let ok = Arc::new(AtomicUsize::new(0));
        let o = ok.clone();
        subscribe(
            &f.registry,
            handler::sync(move |_: &Envelope<Count>| {
                o.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::default(),
        );

        let err = f
            .dispatcher
            .dispatch(&envelope(1), Delivery::Publish)
            .await
            .unwrap_err();
        assert_eq!(err.failures().len(), 2);
        assert!(
            err.failures()
                .iter()
                .all(|failure| matches!(failure.error, Error::HandlerPanicked(_)))
        );
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transform_replaces_delivered_envelope() {
        let f = fixture(Config::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        subscribe(
            &f.registry,
            handler::sync(move |env: &Envelope<Count>| {
                s.store(env.data().0 as usize, Ordering::SeqCst);
                Ok(())
            }),
            SubscribeOptions::default()
                .with_transform(|env: &Envelope<Count>| env.with_data(Count(env.data().0 * 10))),
        );

        let original = envelope(4);
        f.dispatcher
            .dispatch(&original, Delivery::Publish)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 40);
        assert_eq!(original.data().0, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_detaches_handler() {
        let f = fixture(Config::default());
        let finished = Arc::new(AtomicUsize::new(0));
        let done = finished.clone();
        subscribe(
            &f.registry,
            move |_: Arc<Envelope<Count>>| {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(())
                }
            },
            SubscribeOptions::default().with_timeout(Duration::from_millis(50)),
        );

        let err = f
            .dispatcher
            .dispatch(&envelope(1), Delivery::Publish)
            .await
            .unwrap_err();
        assert!(err.failures()[0].error.is_timeout());
        assert_eq!(f.dispatcher.gate().in_flight(), 0);

        // The timed-out handler was not aborted
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_handlers_start_in_registry_order() {
        let f = fixture(Config::default());
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        for (label, priority) in [("low", 1), ("high", 10), ("mid", 5)] {
            let started = started.clone();
            subscribe(
                &f.registry,
                move |_: Arc<Envelope<Count>>| {
                    let started = started.clone();
                    async move {
                        started.lock().unwrap().push(label);
                        tokio::task::yield_now().await;
                        Ok::<_, Error>(())
                    }
                },
                SubscribeOptions::default().with_priority(priority),
            );
        }

        f.dispatcher
            .dispatch(&envelope(1), Delivery::Publish)
            .await
            .unwrap();
        assert_eq!(*started.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_panic_inside_async_body_is_caught() {
        let f = fixture(Config::default());
        subscribe(
            &f.registry,
            |_: Arc<Envelope<Count>>| async move {
                tokio::task::yield_now().await;
                if true {
                    panic!("late explosion");
                }
                Ok::<_, Error>(())
            },
            SubscribeOptions::default(),
        );

        let err = f
            .dispatcher
            .dispatch(&envelope(1), Delivery::Publish)
            .await
            .unwrap_err();
        assert!(matches!(
            &err.failures()[0].error,
            Error::HandlerPanicked(msg) if msg.as_ref() == "late explosion"
        ));
        assert_eq!(f.dispatcher.gate().in_flight(), 0);
    }

    fn gauges() -> crate::metrics::LiveGauges {
        crate::metrics::LiveGauges {
            registered_handlers: 0,
            in_flight_handlers: 0,
            dead_letter_queue_size: 0,
            last_event_timestamp: None,
        }
    }
}
