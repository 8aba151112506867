// Error queue for envelopes the scheduler could not deliver or requeue

use crate::errors::QueueError;
use crate::naming::ERROR_TYPE;
use crate::queue::{Broker, MessageProperties, OutgoingMessage};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{instrument, warn};

pub const STAGE_HEADER: &str = "x-futurepub-stage";
pub const ERROR_HEADER: &str = "x-futurepub-error";
pub const FAILED_AT_HEADER: &str = "x-futurepub-failed-at";

/// Where in the scheduler an envelope failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The delivery body was not a valid envelope
    Decode,
    /// Final publish to the destination exchange failed
    Publish,
    /// Re-publish into the pending exchange failed
    Requeue,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Decode => "decode",
            FailureStage::Publish => "publish",
            FailureStage::Requeue => "requeue",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parks failed envelope bodies, unchanged, on the error exchange with the
/// failure recorded in headers. Operators can inspect them and shovel them
/// back to the live exchange by hand.
#[derive(Clone)]
pub struct ErrorQueue {
    broker: Arc<dyn Broker>,
    exchange: String,
}

impl ErrorQueue {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The message parked for a failed body
    pub fn error_message(body: &[u8], stage: FailureStage, error: &str) -> OutgoingMessage {
        let properties = MessageProperties::persistent()
            .with_kind(ERROR_TYPE)
            .with_header(STAGE_HEADER, stage.as_str())
            .with_header(ERROR_HEADER, error)
            .with_header(FAILED_AT_HEADER, Utc::now().to_rfc3339());

        OutgoingMessage::new(body.to_vec(), properties)
    }

    #[instrument(skip(self, body, error), fields(exchange = %self.exchange))]
    pub async fn forward(
        &self,
        body: &[u8],
        stage: FailureStage,
        error: &str,
    ) -> Result<(), QueueError> {
        warn!(error = %error, "Moving envelope to error queue");

        self.broker
            .publish(
                &self.exchange,
                stage.as_str(),
                Self::error_message(body, stage, error),
            )
            .await
    }
}
