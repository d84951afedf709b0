use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{BrokerResult, Dispatcher, MessageBroker};
use crate::core::Disposition;
use crate::WorkerResult;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Subscribed,
    Draining,
    Stopped,
}

/// Pulls deliveries one at a time, dispatches them and settles each according to the outcome.
pub struct ConsumerLoop {
    broker: Box<dyn MessageBroker>,
    dispatcher: Arc<Dispatcher>,
    grace: Duration,
    state: watch::Sender<WorkerState>,
}

impl ConsumerLoop {
    pub fn new(broker: Box<dyn MessageBroker>, dispatcher: Arc<Dispatcher>) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            broker,
            dispatcher,
            grace: DEFAULT_SHUTDOWN_GRACE,
            state,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn state_receiver(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Consumes until the subscription ends or `shutdown` resolves.
    ///
    /// On shutdown no further deliveries are taken. The message in hand gets up to the
    /// grace period to finish; if it does not, it is abandoned unsettled and the broker
    /// redelivers it to the next consumer.
    pub async fn run<F>(self, shutdown: F) -> WorkerResult<()>
    where
        F: Future<Output = ()>,
    {
        let ConsumerLoop {
            broker,
            dispatcher,
            grace,
            state,
        } = self;
        let stats = dispatcher.stats();
        let token = CancellationToken::new();

        state.send_replace(WorkerState::Subscribed);
        info!("Worker started, waiting for messages");

        let mut handle = tokio::spawn(Self::consume(broker, dispatcher, token.clone()));
        tokio::pin!(shutdown);

        let outcome = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, draining in-flight message (grace {:?})", grace);
                state.send_replace(WorkerState::Draining);
                token.cancel();
                match tokio::time::timeout(grace, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("In-flight message did not finish within {:?}, abandoning it", grace);
                        handle.abort();
                        Ok(Ok(()))
                    }
                }
            }
            joined = &mut handle => {
                info!("Subscription ended");
                joined
            }
        };

        state.send_replace(WorkerState::Stopped);
        stats.finish();
        stats.log_summary();
        info!("Worker stopped");

        match outcome {
            Ok(result) => result.map_err(Into::into),
            Err(e) => {
                error!("Consumer task failed: {}", e);
                Ok(())
            }
        }
    }

    async fn consume(
        mut broker: Box<dyn MessageBroker>,
        dispatcher: Arc<Dispatcher>,
        token: CancellationToken,
    ) -> BrokerResult<()> {
        let stats = dispatcher.stats();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                next = broker.receive() => next,
            };

            let delivery = match next {
                None => return Ok(()),
                Some(Err(e)) => {
                    error!("Failed to receive message: {}", e);
                    return Err(e);
                }
                Some(Ok(delivery)) => delivery,
            };

            stats.record_received();
            debug!(
                "Received delivery {} ({} bytes, redelivered={})",
                delivery.tag,
                delivery.body.len(),
                delivery.redelivered
            );

            let disposition = dispatcher.dispatch(&delivery.body).await;
            match disposition {
                Disposition::Ack => broker.ack(delivery.tag).await?,
                Disposition::Requeue => broker.nack(delivery.tag, true).await?,
                Disposition::Discard => broker.nack(delivery.tag, false).await?,
            }
            stats.record_disposition(disposition);
        }
    }
}
