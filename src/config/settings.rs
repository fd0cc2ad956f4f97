use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Shared secret for the internal event-ingest endpoint
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval advertised to clients in the Hello frame
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Extra time a client gets past the interval before it is timed out
    #[serde(default = "default_heartbeat_grace_ms")]
    pub heartbeat_grace_ms: u64,
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Time without a Heartbeat after which a session is closed
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms + self.heartbeat_grace_ms)
    }
}

/// What the broker does when a subscriber's delivery queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for capacity; the publisher absorbs the backpressure
    #[default]
    Block,
    /// Drop the event for that subscriber and count it
    DropNewest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MembershipConfig {
    #[serde(default)]
    pub backend: MembershipBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_heartbeat_interval_ms() -> u64 {
    41_250
}

fn default_heartbeat_grace_ms() -> u64 {
    5_000
}

fn default_subscriber_capacity() -> usize {
    1024
}

fn default_database_url() -> String {
    "postgres://localhost:5432/volunteer".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "volunteer-gateway".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("websocket.heartbeat_interval_ms", default_heartbeat_interval_ms())?
            .set_default("websocket.heartbeat_grace_ms", default_heartbeat_grace_ms())?
            .set_default("broker.subscriber_capacity", default_subscriber_capacity() as u64)?
            .set_default("broker.overflow", "block")?
            .set_default("membership.backend", "memory")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER_PORT, JWT_SECRET, API_KEY, MEMBERSHIP_BACKEND, ...
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    /// Defaults for everything except token verification
    pub fn with_jwt(jwt: JwtConfig) -> Self {
        Self {
            server: ServerConfig::default(),
            jwt,
            api: ApiConfig::default(),
            websocket: WebSocketConfig::default(),
            broker: BrokerConfig::default(),
            membership: MembershipConfig::default(),
            database: DatabaseConfig::default(),
            otel: OtelConfig::default(),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_grace_ms: default_heartbeat_grace_ms(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
