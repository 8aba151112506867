// Exchange/queue naming and payload type to destination resolution

use crate::errors::NamingError;
use std::collections::HashMap;
use std::sync::Arc;

/// Suffix appended to the live exchange and queue names to form the pending pair
pub const DEFAULT_PENDING_SUFFIX: &str = "_Pending";

/// Type id carried by every delayed envelope
pub const DEFAULT_ENVELOPE_TYPE: &str = "futurepub.schedule_me";

/// Type id of the error exchange/queue pair
pub const ERROR_TYPE: &str = "futurepub.error";

/// Naming rules shared by every service talking to the same broker
pub trait NamingConventions: Send + Sync {
    /// Exchange that messages of `type_id` are published to
    fn exchange_name(&self, type_id: &str) -> String;

    /// Queue a subscription named `subscription_id` reads `type_id` messages from
    fn queue_name(&self, type_id: &str, subscription_id: &str) -> String;
}

/// `<prefix><type_id>` exchanges and `<prefix><type_id>_<subscription>` queues
#[derive(Debug, Clone, Default)]
pub struct DefaultConventions {
    prefix: String,
}

impl DefaultConventions {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl NamingConventions for DefaultConventions {
    fn exchange_name(&self, type_id: &str) -> String {
        format!("{}{}", self.prefix, type_id)
    }

    fn queue_name(&self, type_id: &str, subscription_id: &str) -> String {
        if subscription_id.is_empty() {
            format!("{}{}", self.prefix, type_id)
        } else {
            format!("{}{}_{}", self.prefix, type_id, subscription_id)
        }
    }
}

/// Maps a caller-supplied payload type id to the exchange its messages end up on
pub trait DestinationResolver: Send + Sync {
    fn resolve(&self, type_id: &str) -> Result<String, NamingError>;
}

/// Explicit type id → destination table. Unlisted type ids either fail or, in
/// lenient mode, fall back to the conventions' exchange name.
#[derive(Clone)]
pub struct DestinationRegistry {
    routes: HashMap<String, String>,
    fallback: Option<Arc<dyn NamingConventions>>,
}

impl DestinationRegistry {
    /// Only listed type ids resolve
    pub fn strict(routes: HashMap<String, String>) -> Self {
        Self {
            routes,
            fallback: None,
        }
    }

    /// Listed type ids resolve through the table, others through `conventions`
    pub fn with_fallback(
        routes: HashMap<String, String>,
        conventions: Arc<dyn NamingConventions>,
    ) -> Self {
        Self {
            routes,
            fallback: Some(conventions),
        }
    }

    pub fn register(&mut self, type_id: impl Into<String>, destination: impl Into<String>) {
        self.routes.insert(type_id.into(), destination.into());
    }
}

impl DestinationResolver for DestinationRegistry {
    fn resolve(&self, type_id: &str) -> Result<String, NamingError> {
        if type_id.is_empty() {
            return Err(NamingError::EmptyTypeId);
        }

        if let Some(destination) = self.routes.get(type_id) {
            return Ok(destination.clone());
        }

        match &self.fallback {
            Some(conventions) => Ok(conventions.exchange_name(type_id)),
            None => Err(NamingError::UnknownPayloadType(type_id.to_string())),
        }
    }
}

/// Names of every broker object the scheduler owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNames {
    pub live_exchange: String,
    pub live_queue: String,
    pub pending_exchange: String,
    pub pending_queue: String,
    pub error_exchange: String,
    pub error_queue: String,
}

impl TopologyNames {
    pub fn new(
        conventions: &dyn NamingConventions,
        envelope_type: &str,
        subscription_id: &str,
        pending_suffix: &str,
    ) -> Self {
        let live_exchange = conventions.exchange_name(envelope_type);
        let live_queue = conventions.queue_name(envelope_type, subscription_id);

        Self {
            pending_exchange: format!("{}{}", live_exchange, pending_suffix),
            pending_queue: format!("{}{}", live_queue, pending_suffix),
            live_exchange,
            live_queue,
            error_exchange: conventions.exchange_name(ERROR_TYPE),
            error_queue: conventions.queue_name(ERROR_TYPE, ""),
        }
    }
}
