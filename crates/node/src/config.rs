use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use conduit_keys::KeyRotationConfig;
use conduit_ledger::BatchWriterConfig;
use conduit_pipeline::PipelineConfig;
use conduit_primitives::{PeerId, TieredLimit, TokenId};
use conduit_telemetry::TelemetryBufferConfig;
use conduit_trust::RateLimiterConfig;

/// Configuration loading/validation failures. Every variant is fatal at
/// startup; `conduit-node` never starts with an invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A per-(peer, token) limit config entry, flattened so it round-trips
/// through TOML (which has no native tuple-keyed map).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerTokenLimit {
    pub peer: String,
    pub token: String,
    pub limit: u64,
}

/// Serializable mirror of [`conduit_primitives::TieredLimit`].
///
/// Limits are configured as `u64` rather than `Amount` (`u128`) because TOML
/// has no native 128-bit integer type; [`TieredLimitConfig::build`] widens
/// them when constructing the runtime [`TieredLimit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredLimitConfig {
    pub default: Option<u64>,
    pub global_ceiling: Option<u64>,
    pub per_peer: HashMap<String, u64>,
    pub per_peer_token: Vec<PeerTokenLimit>,
}

impl Default for TieredLimitConfig {
    fn default() -> Self {
        Self {
            default: None,
            global_ceiling: None,
            per_peer: HashMap::new(),
            per_peer_token: Vec::new(),
        }
    }
}

impl TieredLimitConfig {
    fn validate(&self, name: &str) -> Result<(), NodeConfigError> {
        let Some(ceiling) = self.global_ceiling else {
            return Ok(());
        };
        if let Some(default) = self.default {
            if default > ceiling {
                return Err(NodeConfigError::Invalid(format!(
                    "{name}.default ({default}) exceeds {name}.global_ceiling ({ceiling})"
                )));
            }
        }
        for (peer, limit) in &self.per_peer {
            if *limit > ceiling {
                return Err(NodeConfigError::Invalid(format!(
                    "{name}.per_peer[{peer}] ({limit}) exceeds {name}.global_ceiling ({ceiling})"
                )));
            }
        }
        for entry in &self.per_peer_token {
            if entry.limit > ceiling {
                return Err(NodeConfigError::Invalid(format!(
                    "{name}.per_peer_token[{}/{}] ({}) exceeds {name}.global_ceiling ({ceiling})",
                    entry.peer, entry.token, entry.limit
                )));
            }
        }
        Ok(())
    }

    pub fn build(&self) -> TieredLimit {
        let mut limit = TieredLimit {
            default: self.default.map(|v| v as u128),
            global_ceiling: self.global_ceiling.map(|v| v as u128),
            per_peer: HashMap::new(),
            per_peer_token: HashMap::new(),
        };
        for (peer, value) in &self.per_peer {
            limit.per_peer.insert(PeerId::from(peer.as_str()), *value as u128);
        }
        for entry in &self.per_peer_token {
            limit.per_peer_token.insert(
                (PeerId::from(entry.peer.as_str()), TokenId::from(entry.token.as_str())),
                entry.limit as u128,
            );
        }
        limit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfigDto {
    pub default_capacity: f64,
    pub default_refill_rate: f64,
    pub violation_threshold: u32,
    pub window_secs: u64,
    pub block_duration_secs: u64,
    pub adaptive_enabled: bool,
}

impl Default for RateLimiterConfigDto {
    fn default() -> Self {
        let defaults = RateLimiterConfig::default();
        Self {
            default_capacity: defaults.default_capacity,
            default_refill_rate: defaults.default_refill_rate,
            violation_threshold: defaults.violation_threshold,
            window_secs: defaults.window.as_secs(),
            block_duration_secs: defaults.block_duration.as_secs(),
            adaptive_enabled: defaults.adaptive_enabled,
        }
    }
}

impl RateLimiterConfigDto {
    pub fn build(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            default_capacity: self.default_capacity,
            default_refill_rate: self.default_refill_rate,
            violation_threshold: self.violation_threshold,
            window: Duration::from_secs(self.window_secs),
            block_duration: Duration::from_secs(self.block_duration_secs),
            adaptive_enabled: self.adaptive_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchWriterConfigDto {
    pub enabled: bool,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for BatchWriterConfigDto {
    fn default() -> Self {
        let defaults = BatchWriterConfig::default();
        Self {
            enabled: true,
            batch_size: defaults.batch_size,
            flush_interval_ms: defaults.flush_interval.as_millis() as u64,
        }
    }
}

impl BatchWriterConfigDto {
    pub fn build(&self) -> BatchWriterConfig {
        BatchWriterConfig {
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyRotationConfigDto {
    pub enabled: bool,
    pub interval_days: u32,
    pub overlap_days: u32,
    pub notify_before_days: u32,
}

impl Default for KeyRotationConfigDto {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_days: 90,
            overlap_days: 7,
            notify_before_days: 3,
        }
    }
}

impl KeyRotationConfigDto {
    pub fn build(&self) -> KeyRotationConfig {
        KeyRotationConfig {
            enabled: self.enabled,
            interval_days: self.interval_days,
            overlap_days: self.overlap_days,
            notify_before_days: self.notify_before_days,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfigDto {
    pub enabled: bool,
    pub addr: String,
    pub buffering_enabled: bool,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for TelemetryConfigDto {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "127.0.0.1:7777".to_string(),
            buffering_enabled: false,
            batch_size: 50,
            flush_interval_ms: 1000,
        }
    }
}

impl TelemetryConfigDto {
    pub fn buffer_config(&self) -> TelemetryBufferConfig {
        TelemetryBufferConfig {
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfigDto {
    pub enabled: bool,
    pub bind_addr: String,
    pub prefix: String,
    pub upkeep_interval_secs: u64,
}

impl Default for MetricsConfigDto {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: "127.0.0.1:9898".to_string(),
            prefix: "conduit".to_string(),
            upkeep_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfigDto {
    pub enabled: bool,
    pub bind_addr: String,
    /// Shared secret compared against the admin surface's `authorization`
    /// metadata, constant-time.
    pub shared_secret: String,
}

impl Default for AdminConfigDto {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: "127.0.0.1:9090".to_string(),
            shared_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfigDto {
    pub worker_count: usize,
    pub max_queue_size: usize,
}

impl Default for PipelineConfigDto {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            worker_count: defaults.worker_count,
            max_queue_size: defaults.max_queue_size,
        }
    }
}

impl PipelineConfigDto {
    pub fn build(&self) -> PipelineConfig {
        PipelineConfig {
            worker_count: self.worker_count,
            max_queue_size: self.max_queue_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfigDto {
    pub polling_interval_secs: u64,
    pub thresholds: TieredLimitConfig,
}

impl Default for SettlementConfigDto {
    fn default() -> Self {
        Self {
            polling_interval_secs: 30,
            thresholds: TieredLimitConfig::default(),
        }
    }
}

/// The full node configuration. Loaded as
/// `serde`-from-`toml`, with `clap`-sourced CLI overrides applied on top in
/// a defaults-then-file-then-CLI layering, built on `serde`/`toml`/`clap`
/// rather than a higher-level layered-config crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub ledger_number: u32,
    pub rate_limiter: RateLimiterConfigDto,
    pub credit_limits: TieredLimitConfig,
    pub settlement: SettlementConfigDto,
    pub batch_writer: BatchWriterConfigDto,
    pub key_rotation: KeyRotationConfigDto,
    pub telemetry: TelemetryConfigDto,
    pub metrics: MetricsConfigDto,
    pub admin: AdminConfigDto,
    pub pipeline: PipelineConfigDto,
    pub shutdown_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "conduit-node".to_string(),
            ledger_number: 1,
            rate_limiter: RateLimiterConfigDto::default(),
            credit_limits: TieredLimitConfig::default(),
            settlement: SettlementConfigDto::default(),
            batch_writer: BatchWriterConfigDto::default(),
            key_rotation: KeyRotationConfigDto::default(),
            telemetry: TelemetryConfigDto::default(),
            metrics: MetricsConfigDto::default(),
            admin: AdminConfigDto::default(),
            pipeline: PipelineConfigDto::default(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl NodeConfig {
    /// Load `defaults <- file (if present) <- CLI overrides`, then validate.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, NodeConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, NodeConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| NodeConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| NodeConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Eager validation: every invariant this struct must uphold is checked
    /// once at construction, not rediscovered deep in some component's
    /// constructor.
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(NodeConfigError::Invalid("node_id must not be empty".into()));
        }
        self.rate_limiter
            .build()
            .validate()
            .map_err(NodeConfigError::Invalid)?;
        self.credit_limits.validate("credit_limits")?;
        self.settlement.thresholds.validate("settlement.thresholds")?;
        if self.key_rotation.enabled {
            self.key_rotation
                .build()
                .validate()
                .map_err(NodeConfigError::Invalid)?;
        }
        if self.admin.enabled {
            self.admin
                .bind_addr
                .parse::<SocketAddr>()
                .map_err(|e| NodeConfigError::Invalid(format!("admin.bind_addr: {e}")))?;
            if self.admin.shared_secret.is_empty() {
                return Err(NodeConfigError::Invalid(
                    "admin.shared_secret must be set when admin.enabled is true".into(),
                ));
            }
        }
        if self.metrics.enabled {
            self.metrics
                .bind_addr
                .parse::<SocketAddr>()
                .map_err(|e| NodeConfigError::Invalid(format!("metrics.bind_addr: {e}")))?;
        }
        if self.pipeline.worker_count == 0 {
            return Err(NodeConfigError::Invalid("pipeline.worker_count must be positive".into()));
        }
        Ok(())
    }
}

/// CLI overrides applied on top of the loaded file config, grouped into
/// per-concern `clap::Args` structs rather than one flat struct.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Node")]
pub struct ConfigOverrides {
    /// Override the configured node id.
    #[arg(long = "node.id", value_name = "ID")]
    pub node_id: Option<String>,

    /// Override the admin gRPC bind address.
    #[arg(long = "admin.bind", value_name = "ADDR")]
    pub admin_bind: Option<String>,

    /// Enable the admin gRPC surface.
    #[arg(long = "admin.enable")]
    pub admin_enable: bool,

    /// Override the metrics/health HTTP bind address.
    #[arg(long = "metrics.bind", value_name = "ADDR")]
    pub metrics_bind: Option<String>,

    /// Enable the Prometheus metrics/health server.
    #[arg(long = "metrics.enable")]
    pub metrics_enable: bool,

    /// Override the telemetry consumer address.
    #[arg(long = "telemetry.addr", value_name = "ADDR")]
    pub telemetry_addr: Option<String>,

    /// Enable the telemetry emitter.
    #[arg(long = "telemetry.enable")]
    pub telemetry_enable: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(bind) = &self.admin_bind {
            config.admin.bind_addr = bind.clone();
        }
        if self.admin_enable {
            config.admin.enabled = true;
        }
        if let Some(bind) = &self.metrics_bind {
            config.metrics.bind_addr = bind.clone();
        }
        if self.metrics_enable {
            config.metrics.enabled = true;
        }
        if let Some(addr) = &self.telemetry_addr {
            config.telemetry.addr = addr.clone();
        }
        if self.telemetry_enable {
            config.telemetry.enabled = true;
        }
    }
}
