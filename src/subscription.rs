use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use uuid::Uuid;

use crate::{Envelope, EventHandler, Payload};

/// Predicate deciding whether a subscription wants an envelope.
pub type Filter<P> = Arc<dyn Fn(&Envelope<P>) -> bool + Send + Sync>;

/// Rewrites the envelope a subscription's handler receives.
pub type Transform<P> = Arc<dyn Fn(&Envelope<P>) -> Envelope<P> + Send + Sync>;

/// Identifier returned by [`EventBus::subscribe`](crate::EventBus::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscriptionId(u128);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

/// Per-subscription delivery options.
///
/// # Examples
///
/// ```rust,ignore
/// let options = SubscribeOptions::default()
///     .with_priority(10)
///     .with_filter(|env: &Envelope<AccountEvent>| env.metadata().tenant_id() == Some("acme"))
///     .with_timeout(Duration::from_secs(2))
///     .once();
/// ```
pub struct SubscribeOptions<P: Payload> {
    /// Higher priorities start first. Default: 0
    pub priority: i32,
    /// Remove the subscription after its first successful invocation.
    pub once: bool,
    pub filter: Option<Filter<P>>,
    pub transform: Option<Transform<P>>,
    /// Overrides [`Config::handler_timeout`](crate::Config::handler_timeout).
    pub timeout: Option<Duration>,
}

impl<P: Payload> Default for SubscribeOptions<P> {
    fn default() -> Self {
        Self {
            priority: 0,
            once: false,
            filter: None,
            transform: None,
            timeout: None,
        }
    }
}

impl<P: Payload> Clone for SubscribeOptions<P> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            once: self.once,
            filter: self.filter.clone(),
            transform: self.transform.clone(),
            timeout: self.timeout,
        }
    }
}

impl<P: Payload> fmt::Debug for SubscribeOptions<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("priority", &self.priority)
            .field("once", &self.once)
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<P: Payload> SubscribeOptions<P> {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Skip envelopes for which `filter` returns false. Skipped deliveries are
    /// neither errors nor dead-lettered.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Envelope<P>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Hand the handler `transform(envelope)` instead of the published envelope.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Envelope<P>) -> Envelope<P> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One handler's subscription to an event type.
pub(crate) struct Registration<P: Payload> {
    pub id: SubscriptionId,
    pub event_type: Arc<str>,
    pub handler: Arc<dyn EventHandler<P>>,
    pub options: SubscribeOptions<P>,
    /// Set while a `once` registration is being invoked, and kept set after it succeeds.
    claimed: AtomicBool,
}

impl<P: Payload> Registration<P> {
    pub fn new(
        event_type: Arc<str>,
        handler: Arc<dyn EventHandler<P>>,
        options: SubscribeOptions<P>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            event_type,
            handler,
            options,
            claimed: AtomicBool::new(false),
        }
    }

    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    pub fn is_once(&self) -> bool {
        self.options.once
    }

    /// Reserve the single invocation of a `once` registration.
    ///
    /// Returns false if another dispatch already holds or used it.
    /// Always true for ordinary registrations.
    pub fn claim(&self) -> bool {
        !self.is_once()
            || self
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Give a `once` registration back after a failed invocation.
    pub fn release(&self) {
        if self.is_once() {
            self.claimed.store(false, Ordering::Release);
        }
    }

    pub fn info(&self) -> HandlerInfo {
        HandlerInfo {
            id: self.id,
            event_type: self.event_type.to_string(),
            priority: self.options.priority,
            once: self.options.once,
            has_filter: self.options.filter.is_some(),
            has_transform: self.options.transform.is_some(),
            timeout: self.options.timeout,
        }
    }
}

/// Read-only view of a registration, as returned by
/// [`EventBus::handlers`](crate::EventBus::handlers).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HandlerInfo {
    pub id: SubscriptionId,
    pub event_type: String,
    pub priority: i32,
    pub once: bool,
    pub has_filter: bool,
    pub has_transform: bool,
    pub timeout: Option<Duration>,
}
