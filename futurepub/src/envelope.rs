// Delayed envelope: the message that travels through the live and pending queues

use crate::errors::EnvelopeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type of an encoded envelope body
pub const ENVELOPE_CONTENT_TYPE: &str = "application/json";

/// A caller's payload wrapped with the instant it must be released at and the
/// exchange it must be released to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedEnvelope {
    /// Correlation id, kept across requeues
    pub id: Uuid,
    /// Instant at or after which the payload is published
    pub wake_time: DateTime<Utc>,
    /// Destination exchange, also the routing key inside the scheduling topology
    pub destination: String,
    /// Caller's serialized message, never interpreted
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    /// Number of pending-queue cycles completed so far
    #[serde(default)]
    pub requeue_count: u32,
}

impl DelayedEnvelope {
    pub fn new(
        destination: impl Into<String>,
        payload: Vec<u8>,
        wake_time: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        let destination = destination.into();
        if destination.is_empty() {
            return Err(EnvelopeError::EmptyDestination);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            wake_time,
            destination,
            payload,
            requeue_count: 0,
        })
    }

    /// The copy published back into the pending queue. Everything except the
    /// cycle counter is carried over unchanged.
    pub fn next_cycle(&self) -> Self {
        Self {
            requeue_count: self.requeue_count.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::SerializationFailed(e.to_string()))
    }

    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_slice(body)
            .map_err(|e| EnvelopeError::DeserializationFailed(e.to_string()))?;
        if envelope.destination.is_empty() {
            return Err(EnvelopeError::EmptyDestination);
        }
        Ok(envelope)
    }
}

mod payload_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
