//! Herald - in-process domain event bus
//!
//! Typed event envelopes published to prioritised, concurrency-limited
//! handlers, with per-handler timeouts, a dead-letter queue with exponential
//! retry backoff, event history and runtime metrics.
//!
//! ```rust,ignore
//! use herald::{Config, Envelope, EventBus, PublishOptions, SubscribeOptions, handler};
//!
//! #[derive(Clone, Debug, herald::Payload)]
//! enum Account {
//!     #[event_type = "account.opened"]
//!     Opened { owner: String },
//! }
//!
//! let bus = EventBus::new(Config::default());
//! bus.subscribe(
//!     "account.opened",
//!     handler::sync(|env: &Envelope<Account>| {
//!         println!("{:?}", env.data());
//!         Ok(())
//!     }),
//!     SubscribeOptions::default().with_priority(10),
//! );
//! bus.emit(Account::Opened { owner: "ada".into() }, PublishOptions::default()).await?;
//! ```

mod batch;
mod bus;
mod config;
mod envelope;
mod error;
mod meta;
mod metrics;
mod payload;
mod subscription;

pub mod dead_letter;
pub mod handler;

mod internal;

pub use batch::{BATCH_LOG_CAPACITY, Batch, BatchStatus};
pub use bus::EventBus;
pub use config::Config;
pub use dead_letter::DeadLetter;
pub use envelope::Envelope;
pub use error::{Error, HandlerFailure};
pub use handler::{EventHandler, HandlerFuture};
pub use meta::{DEFAULT_EVENT_VERSION, EventMetadata, PublishOptions};
pub use metrics::Metrics;
pub use payload::Payload;
pub use subscription::{Filter, HandlerInfo, SubscribeOptions, SubscriptionId, Transform};

#[cfg(feature = "macros")]
pub use herald_macros::Payload;

pub type Result<T = ()> = std::result::Result<T, Error>;
pub type EventId = u128;
