// Live-queue consumer feeding deliveries to the scheduler

use crate::errors::QueueError;
use futures::future::BoxFuture;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// What to do with a delivery once its handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Remove the delivery from the queue
    Ack,
    /// Leave it unacknowledged so the broker redelivers it after the channel closes
    Leave,
}

/// Callback invoked with the body of every delivery
pub type DeliveryHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, AckAction> + Send + Sync>;

/// Consumer of a single named subscription
#[async_trait::async_trait]
pub trait EnvelopeConsumer: Send + Sync {
    /// Consume until shutdown is requested or the delivery stream ends
    async fn start(&self) -> Result<(), QueueError>;

    /// Request graceful shutdown
    fn shutdown(&self);
}

/// AMQP consumer of the live queue
pub struct AmqpEnvelopeConsumer {
    channel: Channel,
    queue: String,
    consumer_tag: String,
    handler: DeliveryHandler,
    concurrency: usize,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AmqpEnvelopeConsumer {
    pub fn new(
        channel: Channel,
        queue: impl Into<String>,
        consumer_tag: impl Into<String>,
        handler: DeliveryHandler,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            channel,
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            handler,
            concurrency: 1,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Number of deliveries handled at the same time
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[instrument(skip(self, delivery), fields(
        delivery_tag = delivery.delivery_tag,
        redelivered = delivery.redelivered,
    ))]
    async fn process_delivery(&self, mut delivery: Delivery) -> Result<(), QueueError> {
        let body = std::mem::take(&mut delivery.data);

        match (self.handler)(body).await {
            AckAction::Ack => {
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(|e| QueueError::from_lapin(e, QueueError::AckFailed))?;
                debug!("Delivery acknowledged");
            }
            AckAction::Leave => {
                warn!("Delivery left unacknowledged for broker redelivery");
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl EnvelopeConsumer for AmqpEnvelopeConsumer {
    #[instrument(skip(self), fields(queue = %self.queue, consumer_tag = %self.consumer_tag))]
    async fn start(&self) -> Result<(), QueueError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.shutdown_flag.load(Ordering::Relaxed) {
            info!("Shutdown already requested, not starting consumer");
            return Ok(());
        }

        info!(concurrency = self.concurrency, "Starting envelope consumer");

        let deliveries = self
            .channel
            .basic_consume(
                &self.queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::from_lapin(e, QueueError::ConsumerCreation))?;

        info!("Consumer started, waiting for envelopes");

        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown notification received");
        };

        deliveries
            .take_until(shutdown)
            .for_each_concurrent(self.concurrency, |delivery| async move {
                match delivery {
                    Ok(delivery) => {
                        if let Err(e) = self.process_delivery(delivery).await {
                            error!(error = %e, "Failed to process delivery");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error receiving delivery");
                    }
                }
            })
            .await;

        stream_finished(self.shutdown_flag.load(Ordering::Relaxed))
    }

    fn shutdown(&self) {
        info!("Requesting consumer shutdown");
        self.shutdown_flag.store(true, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(());
    }
}

/// A delivery stream that ends without a shutdown request means the channel
/// or connection is gone; the caller must see that as a failure.
fn stream_finished(shutdown_requested: bool) -> Result<(), QueueError> {
    if !shutdown_requested {
        error!("Delivery stream ended unexpectedly");
        return Err(QueueError::ConsumeFailed(
            "delivery stream ended without shutdown".to_string(),
        ));
    }

    info!("Consumer stopped");
    Ok(())
}
