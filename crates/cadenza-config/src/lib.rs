//! # Cadenza Config
//!
//! Unified single-file configuration management for Cadenza. A single
//! `cadenza.yaml` configures the runtime, agent transport, and payment
//! settings; a handful of environment variables override the payment
//! section for deployment:
//!
//! `PAYMENT_NETWORK`, `SIGNER_KEY`, `MERCHANT_ADDRESS`, `RPC_URL`,
//! `AUTO_PAYMENT`, `MAX_PAYMENT_ATOMIC`.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Networks payments may settle on
pub const KNOWN_PAYMENT_NETWORKS: [&str; 2] = ["base", "base-sepolia"];

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration schema for Cadenza.
#[derive(Debug, Clone, Deserialize)]
pub struct CadenzaConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for CadenzaConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            runtime: RuntimeConfig::default(),
            agents: AgentsConfig::default(),
            payments: PaymentsConfig::default(),
        }
    }
}

impl CadenzaConfig {
    /// Defaults with the environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.payments.apply_env()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env_name")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env_name(),
        }
    }
}

fn default_app_name() -> String {
    "cadenza".to_string()
}

fn default_env_name() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Concurrent run workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Idle queue poll interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    /// Per-request timeout for agent calls, seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    60
}

/// Payment settings. The signer key never appears in Debug output.
#[derive(Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Settlement network.
    #[serde(default = "default_network")]
    pub network: String,
    /// Signer private key; absent disables the payment coordinator.
    #[serde(default)]
    pub signer_key: Option<String>,
    /// Wallet that receives payments when this process hosts agents.
    #[serde(default)]
    pub merchant_address: Option<String>,
    /// Chain RPC endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Whether 402 challenges are paid automatically.
    #[serde(default = "default_true")]
    pub auto_payment: bool,
    /// Per-call payment cap, atomic units.
    #[serde(default = "default_max_payment")]
    pub max_payment_atomic: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            signer_key: None,
            merchant_address: None,
            rpc_url: None,
            auto_payment: true,
            max_payment_atomic: default_max_payment(),
        }
    }
}

fn default_network() -> String {
    "base-sepolia".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_payment() -> u64 {
    1_000_000
}

impl PaymentsConfig {
    /// Whether the payment coordinator can be constructed.
    pub fn payments_enabled(&self) -> bool {
        self.signer_key.is_some()
    }

    /// Overlay the `PAYMENT_NETWORK` / `SIGNER_KEY` / `MERCHANT_ADDRESS` /
    /// `RPC_URL` / `AUTO_PAYMENT` / `MAX_PAYMENT_ATOMIC` variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(network) = env::var("PAYMENT_NETWORK") {
            self.network = network;
        }
        if let Ok(key) = env::var("SIGNER_KEY") {
            if !key.trim().is_empty() {
                self.signer_key = Some(key);
            }
        }
        if let Ok(address) = env::var("MERCHANT_ADDRESS") {
            self.merchant_address = Some(address);
        }
        if let Ok(url) = env::var("RPC_URL") {
            self.rpc_url = Some(url);
        }
        if let Ok(raw) = env::var("AUTO_PAYMENT") {
            self.auto_payment = parse_bool(&raw)
                .ok_or_else(|| ConfigError::Invalid(format!("AUTO_PAYMENT: '{raw}'")))?;
        }
        if let Ok(raw) = env::var("MAX_PAYMENT_ATOMIC") {
            self.max_payment_atomic = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("MAX_PAYMENT_ATOMIC: '{raw}'")))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PaymentsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentsConfig")
            .field("network", &self.network)
            .field(
                "signer_key",
                &self.signer_key.as_ref().map(|_| "<redacted>"),
            )
            .field("merchant_address", &self.merchant_address)
            .field("rpc_url", &self.rpc_url)
            .field("auto_payment", &self.auto_payment)
            .field("max_payment_atomic", &self.max_payment_atomic)
            .finish()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load configuration from a YAML file, apply environment overrides, and
/// validate.
pub fn load_config(path: &Path) -> Result<CadenzaConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: CadenzaConfig = serde_yaml::from_str(&content)?;
    config.payments.apply_env()?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &CadenzaConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }
    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }
    if config.runtime.workers == 0 {
        return Err(ConfigError::Invalid(
            "runtime.workers must be > 0".to_string(),
        ));
    }
    if config.agents.call_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "agents.call_timeout_secs must be > 0".to_string(),
        ));
    }
    if !KNOWN_PAYMENT_NETWORKS.contains(&config.payments.network.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "payments.network '{}' is not one of {:?}",
            config.payments.network, KNOWN_PAYMENT_NETWORKS
        )));
    }
    if config.payments.max_payment_atomic == 0 {
        return Err(ConfigError::Invalid(
            "payments.max_payment_atomic must be > 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CadenzaConfig::default();
        validate_config(&config).unwrap();
        assert_eq!(config.payments.network, "base-sepolia");
        assert!(!config.payments.payments_enabled());
    }

    #[test]
    fn test_yaml_parse_with_partial_sections() {
        let yaml = r#"
app:
  name: "cadenza-prod"
  environment: "production"
payments:
  network: "base"
  auto_payment: false
  max_payment_atomic: 250000
"#;
        let config: CadenzaConfig = serde_yaml::from_str(yaml).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.app.name, "cadenza-prod");
        assert_eq!(config.payments.network, "base");
        assert!(!config.payments.auto_payment);
        assert_eq!(config.payments.max_payment_atomic, 250_000);
        assert_eq!(config.runtime.workers, 4);
    }

    #[test]
    fn test_unknown_network_rejected() {
        let mut config = CadenzaConfig::default();
        config.payments.network = "dogechain".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("PAYMENT_NETWORK", "base");
        env::set_var("SIGNER_KEY", "0xdeadbeef");
        env::set_var("AUTO_PAYMENT", "false");
        env::set_var("MAX_PAYMENT_ATOMIC", "42");

        let mut payments = PaymentsConfig::default();
        payments.apply_env().unwrap();

        assert_eq!(payments.network, "base");
        assert!(payments.payments_enabled());
        assert!(!payments.auto_payment);
        assert_eq!(payments.max_payment_atomic, 42);

        env::set_var("AUTO_PAYMENT", "maybe");
        let mut payments = PaymentsConfig::default();
        assert!(matches!(
            payments.apply_env(),
            Err(ConfigError::Invalid(_))
        ));

        env::remove_var("PAYMENT_NETWORK");
        env::remove_var("SIGNER_KEY");
        env::remove_var("AUTO_PAYMENT");
        env::remove_var("MAX_PAYMENT_ATOMIC");
    }

    #[test]
    fn test_signer_key_redacted_in_debug() {
        let mut payments = PaymentsConfig::default();
        payments.signer_key = Some("0xsupersecret".to_string());
        let debug = format!("{payments:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("<redacted>"));
    }
}
