use std::{future::Future, sync::Arc};

use futures_util::future::{BoxFuture, FutureExt};

use crate::{Envelope, Payload, Result};

/// Future returned by [`EventHandler::handle`].
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// A subscriber's unit of work for one delivered event.
///
/// The returned future is polled by the dispatcher, in priority order, and
/// raced against the subscription's timeout. If the timeout wins, the future is
/// moved to its own task and left running with its result ignored; it is not
/// aborted.
///
/// Async closures taking `Arc<Envelope<P>>` implement this trait directly:
///
/// ```rust,ignore
/// bus.subscribe("user.created", |env: Arc<Envelope<UserCreated>>| async move {
///     mailer.send_welcome(&env.data().email).await.map_err(Error::external)
/// }, SubscribeOptions::default());
/// ```
///
/// Handlers must be idempotent: dead-letter retries and batch replay may
/// deliver the same envelope more than once.
pub trait EventHandler<P: Payload>: Send + Sync + 'static {
    fn handle(&self, envelope: Arc<Envelope<P>>) -> HandlerFuture;
}

impl<P, F, Fut> EventHandler<P> for F
where
    P: Payload,
    F: Fn(Arc<Envelope<P>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, envelope: Arc<Envelope<P>>) -> HandlerFuture {
        self(envelope).boxed()
    }
}

/// Adapter for handlers that finish their work synchronously.
pub struct SyncHandler<F>(F);

/// Wrap a synchronous function as an [`EventHandler`].
pub fn sync<P, F>(f: F) -> SyncHandler<F>
where
    P: Payload,
    F: Fn(&Envelope<P>) -> Result<()> + Send + Sync + 'static,
{
    SyncHandler(f)
}

impl<P, F> EventHandler<P> for SyncHandler<F>
where
    P: Payload,
    F: Fn(&Envelope<P>) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, envelope: Arc<Envelope<P>>) -> HandlerFuture {
        futures_util::future::ready((self.0)(&envelope)).boxed()
    }
}
