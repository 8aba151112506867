// Scheduler service: evaluates every envelope delivered from the live queue

use crate::clock::Clock;
use crate::envelope::DelayedEnvelope;
use crate::error_queue::{ErrorQueue, FailureStage};
use crate::errors::QueueError;
use crate::naming::TopologyNames;
use crate::queue::{AckAction, Broker, DeliveryHandler};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::scheduler::decision::{decide, remaining_millis, Decision, DEFAULT_THRESHOLD_MS, MAX_TTL_MS};
use crate::submit::{envelope_message, publish_to_destination};
use crate::telemetry;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Envelopes due within this many milliseconds are released
    pub threshold_ms: u64,
    /// Longest expiration given to a requeued envelope
    pub max_ttl_ms: u32,
    /// `type` annotation on requeued envelopes
    pub envelope_type: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_THRESHOLD_MS,
            max_ttl_ms: MAX_TTL_MS,
            envelope_type: crate::naming::DEFAULT_ENVELOPE_TYPE.to_string(),
        }
    }
}

/// Result of handling one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Payload released to its destination exchange
    Published,
    /// New copy sent to the pending exchange with this expiration
    Requeued { ttl_ms: u32 },
    /// Broker disconnected; the delivery stays unacknowledged
    Skipped,
    /// Failed after retries and parked on the error queue
    Parked { stage: FailureStage },
    /// Failed after retries and could not be parked
    Dropped { stage: FailureStage },
}

impl Evaluation {
    pub fn ack_action(&self) -> AckAction {
        match self {
            Evaluation::Skipped => AckAction::Leave,
            _ => AckAction::Ack,
        }
    }
}

/// Stateless per-delivery evaluator. Every call reads the clock and talks to
/// the broker; nothing is kept between deliveries, so any number of
/// evaluations may run at once.
pub struct SchedulerService {
    config: SchedulerConfig,
    broker: Arc<dyn Broker>,
    names: TopologyNames,
    clock: Arc<dyn Clock>,
    retry: Arc<dyn RetryStrategy>,
    error_queue: Option<ErrorQueue>,
}

impl SchedulerService {
    pub fn new(
        config: SchedulerConfig,
        broker: Arc<dyn Broker>,
        names: TopologyNames,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            broker,
            names,
            clock,
            retry: Arc::new(ExponentialBackoff::default()),
            error_queue: None,
        }
    }

    pub fn with_retry_strategy(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_error_queue(mut self, error_queue: ErrorQueue) -> Self {
        self.error_queue = Some(error_queue);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handler for the live-queue consumer
    pub fn delivery_handler(self: &Arc<Self>) -> DeliveryHandler {
        let service = Arc::clone(self);
        Arc::new(move |body: Vec<u8>| {
            let service = Arc::clone(&service);
            Box::pin(async move { service.handle_delivery(&body).await.ack_action() })
        })
    }

    /// Decode a live-queue delivery and evaluate it
    pub async fn handle_delivery(&self, body: &[u8]) -> Evaluation {
        if !self.broker.is_connected() {
            return self.skip();
        }

        match DelayedEnvelope::decode(body) {
            Ok(envelope) => self.evaluate(&envelope).await,
            Err(e) => {
                error!(error = %e, "Received a delivery that is not a valid envelope");
                self.fail(body, FailureStage::Decode, &e.to_string()).await
            }
        }
    }

    /// Publish the envelope if it is due, otherwise send it around the
    /// pending queue again with a freshly measured expiration.
    #[instrument(skip(self, envelope), fields(
        envelope_id = %envelope.id,
        destination = %envelope.destination,
        requeue_count = envelope.requeue_count,
    ))]
    pub async fn evaluate(&self, envelope: &DelayedEnvelope) -> Evaluation {
        debug!(wake_time = %envelope.wake_time, "Received envelope for publish");

        if !self.broker.is_connected() {
            return self.skip();
        }

        let now = self.clock.now();
        let decision = decide(
            envelope.wake_time,
            now,
            self.config.threshold_ms,
            self.config.max_ttl_ms,
        );

        match decision {
            Decision::Publish => match self.with_retry("publish", || self.publish(envelope)).await {
                Ok(()) => {
                    let lateness_ms = -remaining_millis(envelope.wake_time, now);
                    telemetry::record_published(&envelope.destination, lateness_ms);
                    Evaluation::Published
                }
                Err(e) => self.envelope_failed(envelope, FailureStage::Publish, e).await,
            },
            Decision::Requeue { ttl_ms } => {
                match self
                    .with_retry("requeue", || self.requeue(envelope, ttl_ms))
                    .await
                {
                    Ok(()) => {
                        telemetry::record_requeued(ttl_ms);
                        Evaluation::Requeued { ttl_ms }
                    }
                    Err(e) => self.envelope_failed(envelope, FailureStage::Requeue, e).await,
                }
            }
        }
    }

    /// Release the payload to the exchange it was destined for
    async fn publish(&self, envelope: &DelayedEnvelope) -> Result<(), QueueError> {
        info!("Publishing envelope payload to destination");

        publish_to_destination(
            self.broker.as_ref(),
            &envelope.destination,
            envelope.payload.clone(),
        )
        .await
    }

    /// Put a new copy of the envelope into the pending exchange; the broker
    /// dead-letters it back to the live exchange after `ttl_ms`.
    async fn requeue(&self, envelope: &DelayedEnvelope, ttl_ms: u32) -> Result<(), QueueError> {
        debug!(ttl_ms = ttl_ms, "Requeuing envelope");

        let mut message = envelope_message(&envelope.next_cycle(), &self.config.envelope_type)
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;
        message.properties = message.properties.with_expiration_ms(ttl_ms);

        self.broker
            .publish(&self.names.pending_exchange, &envelope.destination, message)
            .await
    }

    async fn with_retry<F, Fut>(&self, operation: &str, mut attempt_once: F) -> Result<(), QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), QueueError>>,
    {
        let mut attempt = 0;

        loop {
            let error = match attempt_once().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if error.is_disconnect() || !self.broker.is_connected() {
                return Err(error);
            }

            match self.retry.next_delay(attempt) {
                Some(delay) => {
                    attempt += 1;
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Broker operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            }
        }
    }

    async fn envelope_failed(
        &self,
        envelope: &DelayedEnvelope,
        stage: FailureStage,
        error: QueueError,
    ) -> Evaluation {
        if error.is_disconnect() || !self.broker.is_connected() {
            warn!(error = %error, stage = %stage, "Connection lost while handling envelope");
            return self.skip();
        }

        match envelope.encode() {
            Ok(body) => self.fail(&body, stage, &error.to_string()).await,
            Err(encode_error) => {
                error!(error = %encode_error, "Failed to re-encode envelope for error queue");
                self.drop_envelope(stage)
            }
        }
    }

    async fn fail(&self, body: &[u8], stage: FailureStage, error: &str) -> Evaluation {
        telemetry::record_failure(stage.as_str());
        error!(stage = %stage, error = %error, "Envelope could not be handled");

        if let Some(error_queue) = &self.error_queue {
            match error_queue.forward(body, stage, error).await {
                Ok(()) => return Evaluation::Parked { stage },
                Err(e) => {
                    error!(error = %e, "Failed to park envelope on error queue");
                }
            }
        }

        self.drop_envelope(stage)
    }

    fn drop_envelope(&self, stage: FailureStage) -> Evaluation {
        telemetry::record_dropped(stage.as_str());
        error!(stage = %stage, "Envelope dropped");
        Evaluation::Dropped { stage }
    }

    fn skip(&self) -> Evaluation {
        telemetry::record_skipped();
        warn!("Broker disconnected, skipping evaluation");
        Evaluation::Skipped
    }
}
