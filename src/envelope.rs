use std::sync::Arc;

use crate::{
    Error, EventId, EventMetadata, Payload, PublishOptions, Result,
    meta::{new_id, now_nanos},
};

const MAX_EVENT_TYPE_LEN: usize = 255;

/// One published event plus the metadata the bus uses for routing and tracing.
///
/// - `id`: unique identifier generated at publish time.
/// - `event_type`: free-form discriminator subscriptions match on.
/// - `data`: the producer's payload.
/// - `metadata`: see [`EventMetadata`].
/// - `timestamp`: creation time in nanoseconds since Unix epoch.
/// - `aggregate_id` / `aggregate_type`: optional link to the originating entity.
///
/// Envelopes are immutable. A subscription's transform hook produces a new
/// envelope (see [`Envelope::with_data`]) rather than changing the published one.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "P: serde::Serialize",
        deserialize = "P: serde::de::DeserializeOwned"
    ))
)]
pub struct Envelope<P: Payload> {
    id: EventId,
    event_type: Arc<str>,
    data: P,
    metadata: EventMetadata,
    timestamp: u64,
    aggregate_id: Option<Arc<str>>,
    aggregate_type: Option<Arc<str>>,
}

impl<P: Payload> Envelope<P> {
    /// Build a fresh envelope, generating its id and timestamp.
    pub fn new(event_type: impl Into<Arc<str>>, data: P, options: PublishOptions) -> Self {
        let (metadata, aggregate_id, aggregate_type) = options.into_parts();
        Self {
            id: new_id(),
            event_type: event_type.into(),
            data,
            metadata,
            timestamp: now_nanos(),
            aggregate_id,
            aggregate_type,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub(crate) fn event_type_arc(&self) -> &Arc<str> {
        &self.event_type
    }

    pub fn data(&self) -> &P {
        &self.data
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Timestamp in nanoseconds since Unix epoch (u64 truncation).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.aggregate_id.as_deref()
    }

    pub fn aggregate_type(&self) -> Option<&str> {
        self.aggregate_type.as_deref()
    }

    /// Copy of this envelope carrying different data.
    ///
    /// Id, type, metadata and timestamp are kept, so handlers still see the
    /// identity of the published event.
    pub fn with_data(&self, data: P) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Checks the envelope against the publishing rules.
    pub fn validate(&self) -> Result<()> {
        let event_type = self.event_type();
        if event_type.is_empty() {
            return Err(Error::validation("event type must not be empty"));
        }
        if event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(Error::validation(format!(
                "event type exceeds {MAX_EVENT_TYPE_LEN} bytes"
            )));
        }
        if event_type
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(Error::validation(format!(
                "event type '{}' contains whitespace or control characters",
                event_type.escape_debug()
            )));
        }

        if !is_version(self.metadata.version()) {
            return Err(Error::validation(format!(
                "version '{}' is not MAJOR.MINOR.PATCH",
                self.metadata.version()
            )));
        }

        let aggregate = [
            ("aggregate_id", self.aggregate_id()),
            ("aggregate_type", self.aggregate_type()),
        ];
        for (field, value) in self.metadata.optional_fields().into_iter().chain(aggregate) {
            if value.is_some_and(str::is_empty) {
                return Err(Error::validation(format!("{field} must not be empty")));
            }
        }
        if self.aggregate_type.is_some() && self.aggregate_id.is_none() {
            return Err(Error::validation("aggregate_type requires aggregate_id"));
        }

        self.data.validate().map_err(Error::validation)
    }
}

fn is_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Signup {
        email: String,
    }

    impl Payload for Signup {
        fn validate(&self) -> std::result::Result<(), String> {
            if self.email.contains('@') {
                Ok(())
            } else {
                Err(format!("'{}' is not an email address", self.email))
            }
        }
    }

    fn signup() -> Signup {
        Signup {
            email: "ada@example.com".into(),
        }
    }

    #[test]
    fn test_new_envelope_is_valid() {
        let env = Envelope::new("user.created", signup(), PublishOptions::default());
        assert!(env.validate().is_ok());
        assert_eq!(env.event_type(), "user.created");
        assert_eq!(env.metadata().version(), "1.0.0");
        assert!(env.timestamp() > 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Envelope::new("x", signup(), PublishOptions::default());
        let b = Envelope::new("x", signup(), PublishOptions::default());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.metadata().correlation_id(), b.metadata().correlation_id());
    }

    #[test]
    fn test_rejects_bad_event_types() {
        let too_long = "x".repeat(256);
        for event_type in ["", "user created", "tab\there", too_long.as_str()] {
            let env = Envelope::new(event_type, signup(), PublishOptions::default());
            assert!(
                matches!(env.validate(), Err(Error::Validation(_))),
                "{event_type:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_bad_version() {
        for version in ["", "1", "1.0", "1.0.x", "v1.0.0", "1..0"] {
            let env = Envelope::new(
                "x",
                signup(),
                PublishOptions::default().with_version(version),
            );
            assert!(env.validate().is_err(), "{version:?} should be rejected");
        }
        let env = Envelope::new("x", signup(), PublishOptions::default().with_version("2.10.0"));
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_optional_fields() {
        let env = Envelope::new("x", signup(), PublishOptions::default().with_tenant_id(""));
        let err = env.validate().unwrap_err();
        assert!(err.to_string().contains("tenant_id"));

        let mut options = PublishOptions::default();
        options.aggregate_type = Some("user".into());
        let env = Envelope::new("x", signup(), options);
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_payload_validation_is_applied() {
        let env = Envelope::new(
            "x",
            Signup {
                email: "nope".into(),
            },
            PublishOptions::default(),
        );
        let err = env.validate().unwrap_err();
        assert!(err.to_string().contains("not an email address"));
    }

    #[test]
    fn test_with_data_keeps_identity() {
        let env = Envelope::new(
            "x",
            signup(),
            PublishOptions::default().with_aggregate("u1", "user"),
        );
        let copy = env.with_data(Signup {
            email: "grace@example.com".into(),
        });
        assert_eq!(copy.id(), env.id());
        assert_eq!(copy.timestamp(), env.timestamp());
        assert_eq!(copy.aggregate_id(), Some("u1"));
        assert_eq!(copy.data().email, "grace@example.com");
        assert_eq!(env.data().email, "ada@example.com");
    }
}
