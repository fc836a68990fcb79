use std::borrow::Cow;

/// Marker trait for data carried by events published on the bus.
///
/// Implement this for your payload type (often an enum). Payloads must be
/// `Send + Sync + Clone + 'static` because they:
/// - Are wrapped in `Arc<Envelope<P>>` and shared across handler tasks (Sync)
/// - Cross task boundaries and live in spawned handler tasks (Send, 'static)
/// - May be rebuilt by a subscription's transform hook (Clone)
///
/// # Event Types
///
/// Subscriptions match on a free-form event type string. Publishing with
/// [`EventBus::publish`](crate::EventBus::publish) names it explicitly;
/// [`EventBus::emit`](crate::EventBus::emit) asks the payload through
/// `event_type()` instead.
///
/// When using `#[derive(Payload)]` on an enum, `event_type()` returns the
/// variant's `#[event_type = "..."]` value, or the variant name.
pub trait Payload: Send + Sync + Clone + 'static {
    /// Payload-level schema check, run once when the event is published.
    ///
    /// Return `Err(reason)` to reject the event before any handler runs.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// The event type this payload declares for itself, if any.
    fn event_type(&self) -> Option<Cow<'static, str>> {
        None
    }
}

#[cfg(feature = "serde")]
impl Payload for serde_json::Value {}
