// Wiring of settings into broker client, publisher and scheduler service

use crate::clock::Clock;
use crate::config::Settings;
use crate::error_queue::ErrorQueue;
use crate::naming::{DefaultConventions, DestinationRegistry, DestinationResolver, TopologyNames};
use crate::queue::{AmqpClient, AmqpEnvelopeConsumer, Broker, EnvelopeConsumer};
use crate::retry::ExponentialBackoff;
use crate::scheduler::{SchedulerConfig, SchedulerService};
use crate::submit::FuturePublisher;
use crate::topology::TopologyManager;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Names of the scheduler's exchanges and queues under `settings`
pub fn topology_names(settings: &Settings) -> TopologyNames {
    TopologyNames::new(
        &DefaultConventions::new(settings.naming.prefix.clone()),
        &settings.naming.envelope_type,
        &settings.scheduler.subscription_id,
        &settings.naming.pending_suffix,
    )
}

/// Destination table from `settings.routes`
pub fn destination_resolver(settings: &Settings) -> Arc<dyn DestinationResolver> {
    let routes = settings.route_table();
    if settings.strict_routes {
        Arc::new(DestinationRegistry::strict(routes))
    } else {
        Arc::new(DestinationRegistry::with_fallback(
            routes,
            Arc::new(DefaultConventions::new(settings.naming.prefix.clone())),
        ))
    }
}

pub fn topology_manager(settings: &Settings, broker: Arc<dyn Broker>) -> TopologyManager {
    TopologyManager::new(
        broker,
        topology_names(settings),
        settings.scheduler.error_queue_enabled,
    )
}

pub fn build_publisher(
    settings: &Settings,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
) -> FuturePublisher {
    FuturePublisher::new(
        broker.clone(),
        topology_manager(settings, broker),
        destination_resolver(settings),
        clock,
        settings.naming.envelope_type.clone(),
    )
}

pub fn build_scheduler(
    settings: &Settings,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
) -> SchedulerService {
    let names = topology_names(settings);
    let config = SchedulerConfig {
        threshold_ms: settings.scheduler.threshold_ms,
        max_ttl_ms: settings.scheduler.max_ttl_ms,
        envelope_type: settings.naming.envelope_type.clone(),
    };
    let retry = ExponentialBackoff::new(
        settings.scheduler.max_publish_retries,
        settings.scheduler.retry_base_delay_ms,
        settings.scheduler.retry_max_delay_ms,
        0.1,
    );

    let error_exchange = names.error_exchange.clone();
    let service = SchedulerService::new(config, broker.clone(), names, clock)
        .with_retry_strategy(Arc::new(retry));

    if settings.scheduler.error_queue_enabled {
        service.with_error_queue(ErrorQueue::new(broker, error_exchange))
    } else {
        service
    }
}

/// Connect to the broker described by `settings`
#[tracing::instrument(skip(settings))]
pub async fn init_amqp_client(settings: &Settings) -> Result<Arc<AmqpClient>> {
    info!("Initializing AMQP client");

    let client = AmqpClient::new(settings.amqp.clone())
        .await
        .context("Failed to initialize AMQP client")?;

    info!("AMQP client initialized");
    Ok(Arc::new(client))
}

/// Connected scheduler: topology declared and live-queue consumer ready
pub struct SchedulerApp {
    client: Arc<AmqpClient>,
    consumer: AmqpEnvelopeConsumer,
}

impl SchedulerApp {
    #[tracing::instrument(skip(settings, clock))]
    pub async fn start(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        info!("Starting scheduler service");

        let client = init_amqp_client(settings).await?;
        let broker: Arc<dyn Broker> = client.clone();

        let topology = topology_manager(settings, broker.clone());
        topology
            .ensure()
            .await
            .context("Failed to declare scheduling topology")?;
        info!(
            live_queue = %topology.names().live_queue,
            pending_queue = %topology.names().pending_queue,
            "Scheduling topology declared"
        );

        let service = Arc::new(build_scheduler(settings, broker, clock));

        let channel = client
            .consumer_channel()
            .await
            .context("Failed to open consumer channel")?;
        let consumer = AmqpEnvelopeConsumer::new(
            channel,
            topology.names().live_queue.clone(),
            settings.scheduler.subscription_id.clone(),
            service.delivery_handler(),
        )
        .with_concurrency(settings.scheduler.concurrency);

        Ok(Self { client, consumer })
    }

    /// Consume until `stop` is called. Losing the connection ends this with an error.
    pub async fn run(&self) -> Result<()> {
        self.consumer
            .start()
            .await
            .context("Scheduler consumer failed")
    }

    /// Stop consuming; in-flight evaluations finish, undelivered messages stay with the broker
    pub fn stop(&self) {
        info!("Stopping scheduler service");
        self.consumer.shutdown();
    }

    pub async fn close(&self) -> Result<()> {
        self.client
            .close()
            .await
            .context("Failed to close AMQP connection")
    }
}
