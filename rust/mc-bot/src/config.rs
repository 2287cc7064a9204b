use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BotError, BotResult};

/// Bot configuration: cloud identifiers, management channel identity,
/// polling policy and Discord credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gcp: GcpConfig,

    /// The single game server instance
    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub management: ManagementConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    #[serde(default = "default_project_id")]
    pub project_id: String,

    #[serde(default = "default_zone")]
    pub zone: String,

    /// Service account email (required)
    #[serde(default)]
    pub client_email: String,

    /// PEM encoded service account private key
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Timeout for a single compute API request in seconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_instance_name")]
    pub name: String,

    #[serde(default = "default_instance_description")]
    pub description: String,

    #[serde(default = "default_machine_type")]
    pub machine_type: String,

    #[serde(default = "default_source_image")]
    pub source_image: String,

    #[serde(default = "default_disk_name")]
    pub disk_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    /// Hostname of the management server, also the pinned TLS identity
    #[serde(default = "default_management_address")]
    pub address: String,

    #[serde(default = "default_management_port")]
    pub port: u16,

    #[serde(default = "default_client_cert")]
    pub client_cert_path: PathBuf,

    #[serde(default = "default_client_key")]
    pub client_key_path: PathBuf,

    /// Trusted root bundle for the management server certificate
    #[serde(default = "default_ca_cert")]
    pub ca_cert_path: PathBuf,

    /// Whitelist RPC round-trip timeout in seconds (default: 10s)
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Dial/handshake timeout in seconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Operation status poll interval in milliseconds (default: 1000ms)
    #[serde(default = "default_operation_poll_interval")]
    pub operation_poll_interval_ms: u64,

    /// Maximum operation polls before giving up (default: 600)
    #[serde(default = "default_max_operation_polls")]
    pub max_operation_polls: u32,

    /// Transitional status re-read interval in seconds (default: 5s)
    #[serde(default = "default_transition_poll_interval")]
    pub transition_poll_interval_secs: u64,

    /// Maximum transitional re-reads before giving up (default: 120)
    #[serde(default = "default_max_transition_polls")]
    pub max_transition_polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token (required)
    #[serde(default)]
    pub token: String,

    /// Guild the slash commands are registered in (required)
    #[serde(default)]
    pub guild_id: u64,

    /// Mention appended to "server is suspended" replies, e.g. `<@&1234>`
    #[serde(default)]
    pub suspended_alert: Option<String>,

    /// Remove the registered commands on shutdown
    #[serde(default = "default_true")]
    pub remove_commands: bool,
}

// Default value functions
fn default_project_id() -> String {
    "mc-server-316300".to_string()
}
fn default_zone() -> String {
    "us-west1-b".to_string()
}
fn default_private_key_path() -> PathBuf {
    PathBuf::from("certs/google-private-key.txt")
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_api_base_url() -> String {
    "https://compute.googleapis.com/compute/v1".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_instance_name() -> String {
    "mc-server".to_string()
}
fn default_instance_description() -> String {
    "A server used by Houses United to play MC".to_string()
}
fn default_machine_type() -> String {
    "e2-standard-2".to_string()
}
fn default_source_image() -> String {
    "projects/ubuntu-os-cloud/global/images/ubuntu-2004-focal-v20210610".to_string()
}
fn default_disk_name() -> String {
    "my-root-pd".to_string()
}
fn default_management_address() -> String {
    "garage.prototypical.pro".to_string()
}
fn default_management_port() -> u16 {
    50051
}
fn default_client_cert() -> PathBuf {
    PathBuf::from("certs/discord-mc-client.crt")
}
fn default_client_key() -> PathBuf {
    PathBuf::from("certs/discord-mc-client.key")
}
fn default_ca_cert() -> PathBuf {
    PathBuf::from("certs/discord-mc.crt")
}
fn default_rpc_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_operation_poll_interval() -> u64 {
    1000
}
fn default_max_operation_polls() -> u32 {
    600
}
fn default_transition_poll_interval() -> u64 {
    5
}
fn default_max_transition_polls() -> u32 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            zone: default_zone(),
            client_email: String::new(),
            private_key_path: default_private_key_path(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: default_instance_name(),
            description: default_instance_description(),
            machine_type: default_machine_type(),
            source_image: default_source_image(),
            disk_name: default_disk_name(),
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            address: default_management_address(),
            port: default_management_port(),
            client_cert_path: default_client_cert(),
            client_key_path: default_client_key(),
            ca_cert_path: default_ca_cert(),
            rpc_timeout_secs: default_rpc_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            guild_id: 0,
            suspended_alert: None,
            remove_commands: default_true(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            operation_poll_interval_ms: default_operation_poll_interval(),
            max_operation_polls: default_max_operation_polls(),
            transition_poll_interval_secs: default_transition_poll_interval(),
            max_transition_polls: default_max_transition_polls(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, `MC_BOT_CONFIG`, the local
    /// `config/mc-bot.yaml`, or defaults, then apply environment overrides.
    pub fn load(path: Option<&str>) -> BotResult<Self> {
        if let Some(path) = path {
            Self::from_file(path)
        } else if let Ok(config_path) = env::var("MC_BOT_CONFIG") {
            Self::from_file(&config_path)
        } else if Path::new("config/mc-bot.yaml").exists() {
            Self::from_file("config/mc-bot.yaml")
        } else {
            Ok(Self::from_env(Self::default()))
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> BotResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BotError::Configuration(format!("Failed to read config file {path}: {e}"))
        })?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| BotError::Configuration(format!("Failed to parse config: {e}")))?;

        Ok(Self::from_env(config))
    }

    /// Override configuration with environment variables
    pub fn from_env(mut config: Config) -> Self {
        if let Ok(v) = env::var("DISCORD_BOT_TOKEN") {
            config.discord.token = v;
        }
        if let Ok(v) = env::var("DISCORD_GUILD_ID") {
            if let Ok(id) = v.trim().parse::<u64>() {
                config.discord.guild_id = id;
            }
        }
        if let Ok(v) = env::var("SUSPENDED_ALERT") {
            if !v.is_empty() {
                config.discord.suspended_alert = Some(v);
            }
        }
        if let Ok(v) = env::var("REMOVE_COMMANDS") {
            if let Ok(flag) = v.parse::<bool>() {
                config.discord.remove_commands = flag;
            }
        }

        // GCP overrides
        if let Ok(v) = env::var("CLIENT_EMAIL") {
            config.gcp.client_email = v;
        }
        if let Ok(v) = env::var("GCP_PRIVATE_KEY_PATH") {
            config.gcp.private_key_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("GCP_PROJECT_ID") {
            config.gcp.project_id = v;
        }
        if let Ok(v) = env::var("GCP_ZONE") {
            config.gcp.zone = v;
        }
        if let Ok(v) = env::var("GCP_INSTANCE_NAME") {
            config.instance.name = v;
        }

        // Management overrides
        if let Ok(v) = env::var("MANAGEMENT_ADDRESS") {
            config.management.address = v;
        }
        if let Ok(v) = env::var("MANAGEMENT_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                config.management.port = port;
            }
        }
        if let Ok(v) = env::var("MANAGEMENT_CERT_DIR") {
            let dir = PathBuf::from(v);
            config.management.client_cert_path = dir.join("discord-mc-client.crt");
            config.management.client_key_path = dir.join("discord-mc-client.key");
            config.management.ca_cert_path = dir.join("discord-mc.crt");
        }

        config
    }

    /// Check that everything needed at startup is present.
    ///
    /// Reports all missing values at once.
    pub fn validate(&self) -> BotResult<()> {
        let mut missing = Vec::new();
        if self.discord.token.trim().is_empty() {
            missing.push("DISCORD_BOT_TOKEN");
        }
        if self.discord.guild_id == 0 {
            missing.push("DISCORD_GUILD_ID");
        }
        if self.gcp.client_email.trim().is_empty() {
            missing.push("CLIENT_EMAIL");
        }
        if self.gcp.project_id.trim().is_empty() || self.gcp.zone.trim().is_empty() {
            missing.push("GCP_PROJECT_ID/GCP_ZONE");
        }
        if self.instance.name.trim().is_empty() {
            missing.push("GCP_INSTANCE_NAME");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BotError::Configuration(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    /// `host:port` of the management service
    pub fn management_endpoint(&self) -> String {
        format!("{}:{}", self.management.address, self.management.port)
    }

    pub fn operation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle.operation_poll_interval_ms)
    }

    pub fn transition_poll_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle.transition_poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.management.rpc_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.management.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gcp.request_timeout_secs)
    }
}
