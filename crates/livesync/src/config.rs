use crate::types::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub channel: String,
    /// Resumption cursor to start from; normally empty.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub last_message_id: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_drift_slack_ms")]
    pub drift_slack_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// The viewer; required for vote reconciliation.
    #[serde(default)]
    pub id: Option<UserId>,
}

fn default_heartbeat_interval_ms() -> u64 {
    3000
}

fn default_drift_slack_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Load from a config file (any format the `config` crate knows),
    /// overridden by `LIVESYNC__SECTION__KEY` environment variables.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LIVESYNC").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
