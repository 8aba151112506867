// Configuration management with layered configuration (defaults, files, env)

use crate::naming::{DEFAULT_ENVELOPE_TYPE, DEFAULT_PENDING_SUFFIX};
use crate::queue::AmqpConfig;
use crate::scheduler::decision::{DEFAULT_THRESHOLD_MS, MAX_TTL_MS};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub amqp: AmqpConfig,
    pub scheduler: SchedulerSettings,
    pub naming: NamingSettings,
    /// Payload type id → destination exchange. A list rather than a table:
    /// table keys are lowercased on load, type ids are case-sensitive.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Reject type ids missing from `routes` instead of using the naming convention
    #[serde(default)]
    pub strict_routes: bool,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Name of the single live-queue subscription
    pub subscription_id: String,
    /// Envelopes due within this many milliseconds are released
    pub threshold_ms: u64,
    /// Longest expiration given to a requeued envelope
    pub max_ttl_ms: u32,
    /// Deliveries evaluated at the same time
    pub concurrency: usize,
    pub max_publish_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Park undeliverable envelopes on the error queue instead of dropping them
    pub error_queue_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingSettings {
    /// Prepended to every exchange and queue name
    pub prefix: String,
    /// Type id of the envelope itself; names the live pair
    pub envelope_type: String,
    /// Appended to the live names to form the pending pair
    pub pending_suffix: String,
}

/// One `[[routes]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub type_id: String,
    pub destination: String,
}

impl RouteConfig {
    pub fn new(type_id: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            destination: destination.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub metrics_port: Option<u16>,
}

impl Settings {
    /// `routes` as a type id → destination table
    pub fn route_table(&self) -> HashMap<String, String> {
        self.routes
            .iter()
            .map(|route| (route.type_id.clone(), route.destination.clone()))
            .collect()
    }

    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with built-in defaults so files only need to override
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("FUTUREPUB")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.amqp.url.is_empty() {
            return Err("AMQP URL cannot be empty".to_string());
        }
        if self.amqp.prefetch_count == 0 {
            return Err("AMQP prefetch_count must be greater than 0".to_string());
        }

        if self.scheduler.subscription_id.is_empty() {
            return Err("Scheduler subscription_id cannot be empty".to_string());
        }
        if self.scheduler.threshold_ms == 0 {
            return Err("Scheduler threshold_ms must be greater than 0".to_string());
        }
        if self.scheduler.max_ttl_ms == 0 {
            return Err("Scheduler max_ttl_ms must be greater than 0".to_string());
        }
        if self.scheduler.max_ttl_ms > MAX_TTL_MS {
            return Err(format!(
                "Scheduler max_ttl_ms cannot exceed {} (broker limit)",
                MAX_TTL_MS
            ));
        }
        if self.scheduler.concurrency == 0 {
            return Err("Scheduler concurrency must be greater than 0".to_string());
        }

        if self.naming.envelope_type.is_empty() {
            return Err("Naming envelope_type cannot be empty".to_string());
        }
        if self.naming.pending_suffix.is_empty() {
            return Err("Naming pending_suffix cannot be empty".to_string());
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.type_id.is_empty() || route.destination.is_empty() {
                return Err(format!("Route for type id '{}' is incomplete", route.type_id));
            }
            if !seen.insert(route.type_id.as_str()) {
                return Err(format!("Duplicate route for type id '{}'", route.type_id));
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            amqp: AmqpConfig::default(),
            scheduler: SchedulerSettings {
                subscription_id: "FuturePub".to_string(),
                threshold_ms: DEFAULT_THRESHOLD_MS,
                max_ttl_ms: MAX_TTL_MS,
                concurrency: 1,
                max_publish_retries: 3,
                retry_base_delay_ms: 100,
                retry_max_delay_ms: 5_000,
                error_queue_enabled: true,
            },
            naming: NamingSettings {
                prefix: String::new(),
                envelope_type: DEFAULT_ENVELOPE_TYPE.to_string(),
                pending_suffix: DEFAULT_PENDING_SUFFIX.to_string(),
            },
            routes: Vec::new(),
            strict_routes: false,
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
                metrics_port: None,
            },
        }
    }
}
