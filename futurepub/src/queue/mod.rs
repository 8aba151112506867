// Broker access: the narrow broker interface, its AMQP implementation and the live-queue consumer

pub mod amqp;
pub mod broker;
pub mod consumer;

pub use amqp::{AmqpClient, AmqpConfig};
pub use broker::{Broker, MessageProperties, OutgoingMessage, QueueSpec};
pub use consumer::{AckAction, AmqpEnvelopeConsumer, DeliveryHandler, EnvelopeConsumer};
