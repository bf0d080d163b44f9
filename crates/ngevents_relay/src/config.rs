//! Configuration management for the relay.
//!
//! This module handles loading and validation of the relay configuration
//! from TOML files. Command-line overrides are applied by the application.

use ngevents::ServiceCapabilities;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

/// Relay configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Settings of `serve` mode
    #[serde(default)]
    pub server: ServerSettings,
    /// Settings of `connect` mode
    #[serde(default)]
    pub client: ClientSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Services exposed to every client in `serve` mode
    #[serde(default = "default_services")]
    pub services: Vec<ServiceSettings>,
}

/// Listening socket and demo emitter timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:12345")
    pub bind_address: String,
    /// Period of the heartbeat emitter in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Period of the clock emitter in milliseconds
    #[serde(default = "default_clock_interval")]
    pub clock_interval_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    1000
}

fn default_clock_interval() -> u64 {
    5150
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:12345".to_string(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            clock_interval_ms: default_clock_interval(),
        }
    }
}

/// Where to connect and what to subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// WebSocket URL of the relay server
    pub url: String,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSettings>,
    /// Emitted once right after connecting
    #[serde(default)]
    pub greeting: Option<GreetingSettings>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:12345".to_string(),
            subscriptions: vec![
                SubscriptionSettings {
                    service: "heartBeat".to_string(),
                    event: "beat".to_string(),
                    ack: false,
                    hold_ms: 0,
                },
                SubscriptionSettings {
                    service: "clock".to_string(),
                    event: "time".to_string(),
                    ack: true,
                    hold_ms: 250,
                },
            ],
            greeting: Some(GreetingSettings {
                service: "heartBeat".to_string(),
                event: "hello".to_string(),
                message: "Hello world!".to_string(),
            }),
        }
    }
}

/// One remote event logged by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    pub service: String,
    pub event: String,
    /// Acknowledge each event, holding the server's emission until then
    #[serde(default)]
    pub ack: bool,
    /// How long an acknowledged event is held before it is acknowledged
    #[serde(default)]
    pub hold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreetingSettings {
    pub service: String,
    pub event: String,
    pub message: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to use JSON formatting for logs
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Which demo emitter backs a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceSource {
    /// Emits `beat` with a counter on every heartbeat period
    Heartbeat,
    /// Emits `time` with the Unix time in milliseconds on every clock period
    Clock,
}

/// A local emitter exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub name: String,
    pub source: ServiceSource,
    #[serde(default)]
    pub capabilities: ServiceCapabilities,
}

fn default_services() -> Vec<ServiceSettings> {
    vec![
        ServiceSettings {
            name: "heartBeat".to_string(),
            source: ServiceSource::Heartbeat,
            capabilities: ServiceCapabilities {
                listen: true,
                emit: true,
                ack: true,
                rpc: false,
            },
        },
        ServiceSettings {
            name: "clock".to_string(),
            source: ServiceSource::Clock,
            capabilities: ServiceCapabilities::listen_only(),
        },
    ]
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written
    /// and returned.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::with_default_services();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// The default configuration, including the demo services.
    pub fn with_default_services() -> Self {
        Self {
            services: default_services(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }
        if self.server.heartbeat_interval_ms == 0 || self.server.clock_interval_ms == 0 {
            return Err("Emitter intervals must be greater than 0".to_string());
        }

        if !(self.client.url.starts_with("ws://") || self.client.url.starts_with("wss://")) {
            return Err(format!("Invalid client url: {} (expected ws:// or wss://)", self.client.url));
        }
        for subscription in &self.client.subscriptions {
            if subscription.service.is_empty() || subscription.event.is_empty() {
                return Err("Subscriptions need a service and an event".to_string());
            }
        }
        if let Some(greeting) = &self.client.greeting {
            if greeting.service.is_empty() || greeting.event.is_empty() {
                return Err("Greeting needs a service and an event".to_string());
            }
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                return Err("Service names cannot be empty".to_string());
            }
            if !names.insert(service.name.as_str()) {
                return Err(format!("Duplicate service name: {}", service.name));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
