//! Configuration for medgate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Source ledger (XRPL) configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Attestation oracle (Flare/FDC) configuration.
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Connection resilience tunables, shared by both endpoint pools.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Attestation polling configuration.
    #[serde(default)]
    pub attestation: AttestationConfig,

    /// Payment intent configuration.
    #[serde(default)]
    pub intent: IntentConfig,

    /// Access grant configuration.
    #[serde(default)]
    pub grant: GrantConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Source ledger (XRPL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint URLs for the source ledger.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Wallet address that receives hospital payments.
    #[serde(default)]
    pub destination_wallet: String,

    /// Configured USD price of one XRP, used for the rate table.
    #[serde(default = "default_usd_per_xrp")]
    pub usd_per_xrp: f64,
}

/// Attestation oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// HTTP endpoint URLs for the attestation oracle.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Path for submitting attestation requests.
    #[serde(default = "default_submit_path")]
    pub submit_path: String,

    /// Path prefix for polling request status; the request id is appended.
    #[serde(default = "default_status_path")]
    pub status_path: String,
}

/// Circuit breaker, retry and probe tunables for an endpoint pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Maximum attempts per operation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay between attempts, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Consecutive retryable failures before an endpoint's circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before a half-open trial attempt.
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Interval between background liveness probes, in seconds.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Consecutive successes required to close an open circuit.
    #[serde(default = "default_required_successes")]
    pub required_successes: u32,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Attestation polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationConfig {
    /// Seconds between proof polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum polls before reporting a timeout.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Source chain identifier carried in attestation requests.
    #[serde(default = "default_source_id")]
    pub source_id: String,

    /// Capacity of the attested-proof cache.
    #[serde(default = "default_proof_cache_capacity")]
    pub proof_cache_capacity: usize,
}

/// Payment intent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Minutes before an unconfirmed intent expires.
    #[serde(default = "default_intent_ttl_minutes")]
    pub ttl_minutes: i64,

    /// Interval between expiry sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Access grant configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantConfig {
    /// Days an access grant remains valid.
    #[serde(default = "default_grant_ttl_days")]
    pub ttl_days: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            oracle: OracleConfig::default(),
            connection: ConnectionConfig::default(),
            attestation: AttestationConfig::default(),
            intent: IntentConfig::default(),
            grant: GrantConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            destination_wallet: String::new(),
            usd_per_xrp: default_usd_per_xrp(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            submit_path: default_submit_path(),
            status_path: default_status_path(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            required_successes: default_required_successes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            source_id: default_source_id(),
            proof_cache_capacity: default_proof_cache_capacity(),
        }
    }
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_intent_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_grant_ttl_days(),
        }
    }
}

impl ConnectionConfig {
    /// Recovery timeout as a [`Duration`].
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// Probe interval as a [`Duration`].
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

impl AttestationConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Overall poll deadline: interval times attempt budget.
    #[must_use]
    pub fn poll_deadline(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs * u64::from(self.max_poll_attempts))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_usd_per_xrp() -> f64 {
    0.5
}

fn default_submit_path() -> String {
    "/attestation/submit".to_string()
}

fn default_status_path() -> String {
    "/attestation/status".to_string()
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_recovery_timeout_secs() -> u64 {
    30
}

const fn default_probe_interval_secs() -> u64 {
    30
}

const fn default_required_successes() -> u32 {
    3
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_poll_interval_secs() -> u64 {
    10
}

const fn default_max_poll_attempts() -> u32 {
    30
}

fn default_source_id() -> String {
    "testXRP".to_string()
}

const fn default_proof_cache_capacity() -> usize {
    10_000
}

const fn default_intent_ttl_minutes() -> i64 {
    30
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

const fn default_grant_ttl_days() -> i64 {
    30
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default location of the gateway configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "medgate")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("medgate.toml"))
    }
}
