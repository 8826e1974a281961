//! Node configuration types

use orb_core::{Witness, WitnessType};
use orb_pubsub::{PubSubConfig, RedeliveryConfig};
use orb_storage::AnchorStatusConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete node configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity
    #[serde(default)]
    pub node: NodeSettings,

    /// Witness policy
    #[serde(default)]
    pub policy: PolicySettings,

    /// In-memory pub/sub
    #[serde(default)]
    pub pubsub: PubSubSettings,

    /// Message redelivery
    #[serde(default)]
    pub redelivery: RedeliverySettings,

    /// Anchor status tracking
    #[serde(default)]
    pub status: StatusSettings,

    /// Storage housekeeping
    #[serde(default)]
    pub storage: StorageSettings,

    /// Transparency logs
    #[serde(default)]
    pub vct: VctSettings,

    /// Witness selection
    #[serde(default)]
    pub witness: WitnessSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load from an optional TOML file, then apply `ORB_` environment
    /// overrides (`ORB_VCT__LOG_URL=...` sets `vct.log_url`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("ORB").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(policy) = &self.policy.initial {
            orb_policy::WitnessPolicyConfig::parse(policy)
                .map_err(|e| anyhow::anyhow!("invalid initial witness policy: {e}"))?;
        }

        if self.redelivery.backoff_factor < 1.0 {
            anyhow::bail!("redelivery.backoff_factor must be at least 1.0");
        }

        if self.redelivery.initial_backoff_ms > self.redelivery.max_backoff_ms {
            anyhow::bail!("redelivery.initial_backoff_ms exceeds redelivery.max_backoff_ms");
        }

        if self.pubsub.buffer_size == 0 || self.pubsub.concurrency == 0 || self.redelivery.max_messages == 0 {
            anyhow::bail!("pub/sub buffer sizes must be positive");
        }

        Ok(())
    }
}

/// Basic node settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Node name
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Service IRI of this node
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Base64 Ed25519 secret key used to sign witness proofs. A key is
    /// generated at startup when unset.
    #[serde(default)]
    pub signing_key: Option<String>,
}

fn default_node_name() -> String {
    "orb-node".to_string()
}

fn default_service_url() -> String {
    "https://localhost/services/orb".to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            service_url: default_service_url(),
            signing_key: None,
        }
    }
}

impl NodeSettings {
    /// Verification method referenced by this node's proofs
    pub fn verification_method(&self) -> String {
        format!("{}#main-key", self.service_url)
    }
}

/// Witness policy settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Policy installed at startup when none is stored
    #[serde(default)]
    pub initial: Option<String>,
}

/// Pub/sub settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PubSubSettings {
    /// Ack/Nack timeout in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

fn default_buffer_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    20
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_ack_timeout_ms(),
            buffer_size: default_buffer_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl PubSubSettings {
    pub fn to_config(&self) -> PubSubConfig {
        PubSubConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            buffer_size: self.buffer_size,
            concurrency: self.concurrency,
        }
    }
}

/// Redelivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedeliverySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_max_messages() -> usize {
    20
}

impl Default for RedeliverySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_messages: default_max_messages(),
        }
    }
}

impl RedeliverySettings {
    pub fn to_config(&self) -> RedeliveryConfig {
        RedeliveryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_factor: self.backoff_factor,
            max_messages: self.max_messages,
        }
    }
}

/// Anchor status settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSettings {
    /// Maximum time witnesses are given to respond, in seconds
    #[serde(default = "default_max_witness_delay_secs")]
    pub max_witness_delay_secs: u64,

    /// Delay before an in-process anchor is re-checked, in seconds
    #[serde(default = "default_check_status_after_secs")]
    pub check_status_after_secs: u64,

    /// Interval of the in-process anchor sweep, in seconds
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_max_witness_delay_secs() -> u64 {
    600
}

fn default_check_status_after_secs() -> u64 {
    15
}

fn default_check_interval_secs() -> u64 {
    10
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            max_witness_delay_secs: default_max_witness_delay_secs(),
            check_status_after_secs: default_check_status_after_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl StatusSettings {
    pub fn to_config(&self) -> AnchorStatusConfig {
        AnchorStatusConfig {
            max_witness_delay: Duration::from_secs(self.max_witness_delay_secs),
            check_status_after: Duration::from_secs(self.check_status_after_secs),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

/// Storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Interval of the expired-record sweep, in seconds
    #[serde(default = "default_expiry_interval_secs")]
    pub expiry_interval_secs: u64,
}

fn default_expiry_interval_secs() -> u64 {
    60
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            expiry_interval_secs: default_expiry_interval_secs(),
        }
    }
}

impl StorageSettings {
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }
}

/// Transparency log settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VctSettings {
    /// Log that records witnessed credentials. Proofs are signed locally
    /// when unset.
    #[serde(default)]
    pub log_url: Option<String>,

    /// Interval of the log consistency monitor, in seconds
    #[serde(default = "default_monitoring_interval_secs")]
    pub monitoring_interval_secs: u64,

    /// HTTP timeout of log requests, in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_monitoring_interval_secs() -> u64 {
    10
}

fn default_http_timeout_secs() -> u64 {
    60
}

impl Default for VctSettings {
    fn default() -> Self {
        Self {
            log_url: None,
            monitoring_interval_secs: default_monitoring_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl VctSettings {
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Witness selection settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WitnessSettings {
    /// System witnesses invited for every anchor
    #[serde(default)]
    pub system_witnesses: Vec<SystemWitness>,

    /// Only invite witnesses on the `invite-witness` accept list
    #[serde(default)]
    pub enforce_accept_list: bool,
}

/// Configured system witness
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemWitness {
    pub uri: String,

    #[serde(default)]
    pub has_log: bool,
}

impl WitnessSettings {
    pub fn witnesses(&self) -> Vec<Witness> {
        self.system_witnesses
            .iter()
            .map(|w| Witness::new(WitnessType::System, w.uri.clone(), w.has_log))
            .collect()
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
