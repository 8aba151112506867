// Error types for submission, scheduling and broker access

use thiserror::Error;

/// Broker transport errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to broker: {0}")]
    Connection(String),

    #[error("Broker is not connected")]
    Disconnected,

    #[error("Failed to declare exchange '{name}': {reason}")]
    ExchangeDeclaration { name: String, reason: String },

    #[error("Failed to declare queue '{name}': {reason}")]
    QueueDeclaration { name: String, reason: String },

    #[error("Failed to bind queue '{queue}' to exchange '{exchange}': {reason}")]
    Binding {
        exchange: String,
        queue: String,
        reason: String,
    },

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Broker rejected published message on exchange '{0}'")]
    PublishNacked(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),
}

impl QueueError {
    /// True when the failure means the connection itself is gone, as opposed
    /// to a single operation being refused.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, QueueError::Disconnected | QueueError::Connection(_))
    }
}

/// Payload type to destination resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Payload type id cannot be empty")]
    EmptyTypeId,

    #[error("No destination registered for payload type '{0}'")]
    UnknownPayloadType(String),
}

/// Envelope encoding errors
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Envelope serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Envelope deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Envelope destination cannot be empty")]
    EmptyDestination,
}

/// Errors surfaced to callers of the submission API
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Failed to encode message for payload type '{type_id}': {reason}")]
    MessageEncoding { type_id: String, reason: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl QueueError {
    /// Connection-level lapin failures become `Disconnected`/`Connection`;
    /// anything else is described by `describe`.
    pub(crate) fn from_lapin(err: lapin::Error, describe: impl FnOnce(String) -> Self) -> Self {
        match err {
            lapin::Error::InvalidConnectionState(_) | lapin::Error::InvalidChannelState(_) => {
                QueueError::Disconnected
            }
            lapin::Error::IOError(e) => QueueError::Connection(e.to_string()),
            other => describe(other.to_string()),
        }
    }
}
