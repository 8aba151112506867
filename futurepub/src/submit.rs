// Submission encoder: wraps a payload in a delayed envelope, or publishes it directly when already due

use crate::clock::Clock;
use crate::envelope::{DelayedEnvelope, ENVELOPE_CONTENT_TYPE};
use crate::errors::{EnvelopeError, QueueError, SubmitError};
use crate::naming::DestinationResolver;
use crate::queue::{Broker, MessageProperties, OutgoingMessage};
use crate::telemetry;
use crate::topology::TopologyManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// What `submit` did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Wake time was not in the future; the payload went straight to its destination
    Direct { destination: String },
    /// The payload is travelling through the scheduler inside an envelope
    Scheduled {
        envelope_id: Uuid,
        destination: String,
        wake_time: DateTime<Utc>,
    },
}

/// Publish `payload` to the exchange named `destination`, using the
/// destination as both routing key and `type` annotation.
pub async fn publish_to_destination(
    broker: &dyn Broker,
    destination: &str,
    payload: Vec<u8>,
) -> Result<(), QueueError> {
    broker.declare_exchange(destination).await?;

    let properties = MessageProperties::persistent().with_kind(destination);
    broker
        .publish(
            destination,
            destination,
            OutgoingMessage::new(payload, properties),
        )
        .await
}

/// Broker message carrying an encoded envelope, without an expiration
pub(crate) fn envelope_message(
    envelope: &DelayedEnvelope,
    envelope_type: &str,
) -> Result<OutgoingMessage, EnvelopeError> {
    let properties = MessageProperties::persistent()
        .with_kind(envelope_type)
        .with_content_type(ENVELOPE_CONTENT_TYPE)
        .with_message_id(envelope.id.to_string());

    Ok(OutgoingMessage::new(envelope.encode()?, properties))
}

/// Entry point for callers that want a message delivered later
#[derive(Clone)]
pub struct FuturePublisher {
    broker: Arc<dyn Broker>,
    topology: TopologyManager,
    resolver: Arc<dyn DestinationResolver>,
    clock: Arc<dyn Clock>,
    envelope_type: String,
}

impl FuturePublisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        topology: TopologyManager,
        resolver: Arc<dyn DestinationResolver>,
        clock: Arc<dyn Clock>,
        envelope_type: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            topology,
            resolver,
            clock,
            envelope_type: envelope_type.into(),
        }
    }

    /// Deliver `payload` to the destination registered for `type_id` at or
    /// shortly after `wake_time`.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn submit(
        &self,
        type_id: &str,
        payload: Vec<u8>,
        wake_time: DateTime<Utc>,
    ) -> Result<Submission, SubmitError> {
        let destination = self.resolver.resolve(type_id)?;

        if wake_time <= self.clock.now() {
            publish_to_destination(self.broker.as_ref(), &destination, payload).await?;
            telemetry::record_submission(false);

            info!(destination = %destination, "Wake time already passed, published directly");
            return Ok(Submission::Direct { destination });
        }

        let envelope = DelayedEnvelope::new(destination, payload, wake_time)?;
        let message = envelope_message(&envelope, &self.envelope_type)?;

        self.topology.ensure_topology(&envelope.destination).await?;

        self.broker
            .publish(
                &self.topology.names().live_exchange,
                &envelope.destination,
                message,
            )
            .await?;
        telemetry::record_submission(true);

        info!(
            envelope_id = %envelope.id,
            destination = %envelope.destination,
            wake_time = %envelope.wake_time,
            "Envelope submitted for scheduled delivery"
        );

        Ok(Submission::Scheduled {
            envelope_id: envelope.id,
            destination: envelope.destination,
            wake_time: envelope.wake_time,
        })
    }

    /// Serialize `message` as JSON and submit it
    pub async fn submit_message<T: Serialize + Sync + ?Sized>(
        &self,
        type_id: &str,
        message: &T,
        wake_time: DateTime<Utc>,
    ) -> Result<Submission, SubmitError> {
        let payload = serde_json::to_vec(message).map_err(|e| SubmitError::MessageEncoding {
            type_id: type_id.to_string(),
            reason: e.to_string(),
        })?;

        self.submit(type_id, payload, wake_time).await
    }

    /// Submit `payload` for delivery `delay` from now
    pub async fn submit_after(
        &self,
        type_id: &str,
        payload: Vec<u8>,
        delay: Duration,
    ) -> Result<Submission, SubmitError> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let wake_time = self
            .clock
            .now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.submit(type_id, payload, wake_time).await
    }
}
