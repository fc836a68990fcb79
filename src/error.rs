use std::{sync::Arc, time::Duration};

use tokio::sync::AcquireError;

use crate::SubscriptionId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Invalid event: {0}")]
    Validation(Arc<str>),

    #[error("Handler timeout after {0:?}")]
    HandlerTimeout(Duration),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(Arc<str>),

    #[error("{} of {total} handler(s) failed for '{event_type}'", .failures.len())]
    Dispatch {
        event_type: Arc<str>,
        total: usize,
        failures: Vec<HandlerFailure>,
    },

    #[error("The concurrency gate has been closed")]
    GateClosed,

    #[error("Error external to Herald occurred: {0}")]
    External(Arc<str>),
}

impl Error {
    /// Wraps any displayable failure raised inside a handler.
    pub fn external(message: impl std::fmt::Display) -> Self {
        Error::External(message.to_string().into())
    }

    pub(crate) fn validation(reason: impl Into<Arc<str>>) -> Self {
        Error::Validation(reason.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::HandlerTimeout(_))
    }

    /// Per-handler failures when this is an aggregate dispatch error.
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            Error::Dispatch { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl From<AcquireError> for Error {
    fn from(_: AcquireError) -> Self {
        Error::GateClosed
    }
}

/// One registration's failure inside an aggregate [`Error::Dispatch`].
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub subscription_id: SubscriptionId,
    pub error: Error,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.subscription_id, self.error)
    }
}
