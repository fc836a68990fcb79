use std::{sync::Arc, time::SystemTime};

use uuid::Uuid;

use crate::{Envelope, EventId, Payload};

pub const DEFAULT_EVENT_VERSION: &str = "1.0.0";

/// Delivery metadata attached to every event envelope.
///
/// - `correlation_id`: links every event of one business flow. Generated at
///   publish time unless the producer supplies one.
/// - `causation_id`: id of the event that directly caused this one.
/// - `user_id`, `tenant_id`, `session_id`, `user_agent`, `ip_address`: request
///   context of the producer, all optional.
/// - `version`: schema version of the payload, `"1.0.0"` unless set.
///
/// The bus does not interpret any of these values; they are carried for
/// handlers (audit, notifications, analytics) to use.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventMetadata {
    correlation_id: EventId,
    causation_id: Option<EventId>,
    user_id: Option<Arc<str>>,
    tenant_id: Option<Arc<str>>,
    session_id: Option<Arc<str>>,
    user_agent: Option<Arc<str>>,
    ip_address: Option<Arc<str>>,
    version: Arc<str>,
}

impl EventMetadata {
    pub fn correlation_id(&self) -> EventId {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<EventId> {
        self.causation_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Optional string fields by name, for validation.
    pub(crate) fn optional_fields(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("user_id", self.user_id()),
            ("tenant_id", self.tenant_id()),
            ("session_id", self.session_id()),
            ("user_agent", self.user_agent()),
            ("ip_address", self.ip_address()),
        ]
    }
}

/// Optional delivery metadata supplied by the producer of an event.
///
/// # Examples
///
/// ```rust
/// use herald::PublishOptions;
///
/// let options = PublishOptions::default()
///     .with_tenant_id("acme")
///     .with_user_id("u-42")
///     .with_aggregate("u-42", "user");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub correlation_id: Option<EventId>,
    pub causation_id: Option<EventId>,
    pub user_id: Option<Arc<str>>,
    pub tenant_id: Option<Arc<str>>,
    pub session_id: Option<Arc<str>>,
    pub user_agent: Option<Arc<str>>,
    pub ip_address: Option<Arc<str>>,
    pub version: Option<Arc<str>>,
    pub aggregate_id: Option<Arc<str>>,
    pub aggregate_type: Option<Arc<str>>,
}

impl PublishOptions {
    /// Options for an event caused by `parent`.
    ///
    /// The follow-up shares the parent's correlation id, records the parent as
    /// its cause, and keeps the parent's tenant and user.
    pub fn caused_by<P: Payload>(parent: &Envelope<P>) -> Self {
        let meta = parent.metadata();
        Self {
            correlation_id: Some(meta.correlation_id()),
            causation_id: Some(parent.id()),
            user_id: meta.user_id.clone(),
            tenant_id: meta.tenant_id.clone(),
            ..Default::default()
        }
    }

    pub fn with_correlation_id(mut self, id: EventId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_causation_id(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<Arc<str>>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<Arc<str>>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<Arc<str>>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<Arc<str>>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<Arc<str>>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<Arc<str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Link the event to the entity it originated from.
    pub fn with_aggregate(
        mut self,
        aggregate_id: impl Into<Arc<str>>,
        aggregate_type: impl Into<Arc<str>>,
    ) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Split into envelope metadata (generating the correlation id if absent)
    /// and the aggregate linkage.
    pub(crate) fn into_parts(self) -> (EventMetadata, Option<Arc<str>>, Option<Arc<str>>) {
        let meta = EventMetadata {
            correlation_id: self.correlation_id.unwrap_or_else(new_id),
            causation_id: self.causation_id,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            session_id: self.session_id,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            version: self.version.unwrap_or_else(|| DEFAULT_EVENT_VERSION.into()),
        };
        (meta, self.aggregate_id, self.aggregate_type)
    }
}

pub(crate) fn new_id() -> EventId {
    Uuid::new_v4().as_u128()
}

/// Wall-clock time in nanoseconds since Unix epoch (truncated to `u64`).
pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
