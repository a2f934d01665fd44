use std::fs;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::payment::{SagaConfig, SideEffectConfig, WorkerConfig};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub saga: SagaConfig,
    #[serde(default)]
    pub side_effects: SideEffectConfig,
    #[serde(default)]
    pub recovery: WorkerConfig,
    /// Remote service endpoints; any left unset is simulated in memory
    #[serde(default)]
    pub clients: ClientsConfig,
    /// PostgreSQL payment store; in-memory store when unset
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Seed data for simulated directory/ledger
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ClientsConfig {
    pub directory_url: Option<String>,
    pub ledger_url: Option<String>,
    pub audit_url: Option<String>,
    /// Webhook receiving `{topic, event}` envelopes
    pub events_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SimulationConfig {
    pub customers: Vec<SimulatedCustomer>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulatedCustomer {
    pub id: u64,
    pub account_id: u64,
    pub name: String,
    /// Opening balance, minor units
    pub balance: u64,
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: payment.log
use_json: false
rotation: daily
gateway:
  host: 0.0.0.0
  port: 8080
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert!(config.postgres_url.is_none());
        assert!(config.clients.ledger_url.is_none());
        assert_eq!(config.side_effects.topic, "payment-notifications");
        assert_eq!(config.saga.max_cas_attempts, 3);
        assert!(config.simulation.customers.is_empty());
    }

    #[test]
    fn test_overrides_and_seed_data() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
saga:
  max_amount: 5000
  compensation:
    max_attempts: 2
    initial_backoff_ms: 10
    max_backoff_ms: 20
clients:
  ledger_url: http://ledger:9000
simulation:
  customers:
    - { id: 1, account_id: 101, name: Alice, balance: 1000 }
"#
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.saga.max_amount, 5000);
        assert_eq!(config.saga.compensation.max_attempts, 2);
        // Unset fields inside a section keep their defaults
        assert_eq!(config.saga.remote_timeout_ms, 3_000);
        assert_eq!(config.clients.ledger_url.as_deref(), Some("http://ledger:9000"));
        assert_eq!(config.simulation.customers[0].balance, 1000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load("does-not-exist").is_err());
    }
}
