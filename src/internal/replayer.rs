use std::{sync::Arc, time::Duration};

use tokio::{
    select,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{Payload, bus::BusInner};

/// Spawn the periodic batch replay loop. It runs until `cancel_token` fires.
pub(crate) fn spawn_replayer<P: Payload>(
    inner: Arc<BusInner<P>>,
    period: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    inner.run_batch_cycle().await;
                }
            }
        }
        tracing::debug!("Batch replayer stopped");
    })
}
