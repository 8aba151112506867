// Narrow broker interface consumed by the submission encoder, topology manager and scheduler

use crate::errors::QueueError;
use std::collections::BTreeMap;

/// AMQP basic properties the scheduler cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Message type annotation (`type` property)
    pub kind: Option<String>,
    /// Per-message TTL as a decimal millisecond string
    pub expiration: Option<String>,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub persistent: bool,
}

impl MessageProperties {
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_expiration_ms(mut self, ttl_ms: u32) -> Self {
        self.expiration = Some(ttl_ms.to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A message ready to be handed to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

impl OutgoingMessage {
    pub fn new(body: Vec<u8>, properties: MessageProperties) -> Self {
        Self { body, properties }
    }
}

/// Durable queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    /// Exchange that expired or rejected messages are re-routed to
    pub dead_letter_exchange: Option<String>,
}

impl QueueSpec {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dead_letter_exchange: None,
        }
    }

    pub fn dead_lettering_to(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }
}

/// Broker operations used by this crate. Every declaration must be idempotent
/// on the broker side: declaring an existing object with identical arguments
/// is a no-op.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Whether the underlying connection is currently usable
    fn is_connected(&self) -> bool;

    /// Declare a durable topic exchange
    async fn declare_exchange(&self, name: &str) -> Result<(), QueueError>;

    /// Declare a durable queue
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), QueueError>;

    /// Bind `queue` to `exchange` with a topic binding key
    async fn bind(&self, exchange: &str, queue: &str, binding_key: &str) -> Result<(), QueueError>;

    /// Publish to `exchange`, returning once the broker has taken the message
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_is_decimal_milliseconds() {
        let props = MessageProperties::persistent().with_expiration_ms(12_000);
        assert_eq!(props.expiration.as_deref(), Some("12000"));
        assert!(props.persistent);
    }

    #[test]
    fn test_queue_spec_dead_letter() {
        let spec = QueueSpec::durable("pending").dead_lettering_to("live");
        assert_eq!(spec.name, "pending");
        assert_eq!(spec.dead_letter_exchange.as_deref(), Some("live"));
    }
}
