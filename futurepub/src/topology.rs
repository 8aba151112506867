// Provisioning of the live, pending and error exchange/queue pairs

use crate::errors::QueueError;
use crate::naming::TopologyNames;
use crate::queue::{Broker, QueueSpec};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Topic binding key that matches every routing key
pub const MATCH_ALL: &str = "#";

/// Declares the broker objects the scheduler depends on. Declarations are
/// repeated on every call; the broker treats identical re-declarations as
/// no-ops, so calling this any number of times leaves one set of objects.
///
/// Expiry in the pending queue is head-of-line: the broker only dead-letters
/// the message at the front of the queue, so an envelope with a short TTL
/// queued behind one with a long TTL waits for the long one to expire first.
/// The scheduler re-measures on every delivery, so this delays release but
/// never releases early.
#[derive(Clone)]
pub struct TopologyManager {
    broker: Arc<dyn Broker>,
    names: TopologyNames,
    error_queue_enabled: bool,
}

impl TopologyManager {
    pub fn new(broker: Arc<dyn Broker>, names: TopologyNames, error_queue_enabled: bool) -> Self {
        Self {
            broker,
            names,
            error_queue_enabled,
        }
    }

    pub fn names(&self) -> &TopologyNames {
        &self.names
    }

    /// Ensure the scheduling topology exists before an envelope for
    /// `destination` enters it. All destinations share one live pair and one
    /// pending pair, so the declarations do not depend on `destination`; it is
    /// only recorded on the span and travels as the routing key.
    #[instrument(skip(self, destination), fields(
        destination = %destination,
        live_exchange = %self.names.live_exchange,
    ))]
    pub async fn ensure_topology(&self, destination: &str) -> Result<(), QueueError> {
        self.ensure().await?;
        debug!(destination = %destination, "Scheduling topology ensured");
        Ok(())
    }

    /// Declare every scheduler-owned exchange, queue and binding
    pub async fn ensure(&self) -> Result<(), QueueError> {
        let names = &self.names;

        self.declare_pair(
            &names.live_exchange,
            QueueSpec::durable(names.live_queue.clone()),
        )
        .await?;

        self.declare_pair(
            &names.pending_exchange,
            QueueSpec::durable(names.pending_queue.clone())
                .dead_lettering_to(names.live_exchange.clone()),
        )
        .await?;

        if self.error_queue_enabled {
            self.declare_pair(
                &names.error_exchange,
                QueueSpec::durable(names.error_queue.clone()),
            )
            .await?;
        }

        Ok(())
    }

    async fn declare_pair(&self, exchange: &str, queue: QueueSpec) -> Result<(), QueueError> {
        self.broker.declare_exchange(exchange).await?;
        self.broker.declare_queue(&queue).await?;
        self.broker.bind(exchange, &queue.name, MATCH_ALL).await
    }
}
