//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_PROVIDER_MODEL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The provider API key is additionally readable from DEEPGRAM_API_KEY so it
//! never has to live in a checked-in config file.

use crate::provider::ProviderOptions;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub relay: RelayConfig,
}

/// HTTP listener and static asset settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served at `/`, with its index document answering `GET /`
    pub static_root: String,
}

/// Upstream transcription provider settings.
///
/// `language`, `punctuate`, `smart_format` and `model` travel to the
/// provider as live-session options; `url` and `api_key` stay local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Live-transcription WebSocket endpoint
    pub url: String,
    /// API key sent as a Token authorization header (never logged)
    pub api_key: String,
    pub language: String,
    pub punctuate: bool,
    pub smart_format: bool,
    pub model: String,
}

impl ProviderConfig {
    /// The option set sent when opening a live session.
    pub fn options(&self) -> ProviderOptions {
        ProviderOptions {
            language: self.language.clone(),
            punctuate: self.punctuate,
            smart_format: self.smart_format,
            model: self.model.clone(),
        }
    }
}

/// Relay session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum number of concurrently connected client channels
    pub max_sessions: usize,
    /// How often the server pings idle client channels (seconds)
    pub heartbeat_interval_secs: u64,
    /// How long without any client life sign before the channel is dropped (seconds)
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                static_root: "public".to_string(),
            },
            provider: ProviderConfig {
                url: "wss://api.deepgram.com/v1/listen".to_string(),
                api_key: String::new(),
                language: "en".to_string(),
                punctuate: true,
                smart_format: true,
                model: "nova".to_string(),
            },
            relay: RelayConfig {
                max_sessions: 16,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: override the listener host
    /// - `APP_PROVIDER_MODEL=nova-2`: override the provider model
    /// - `HOST` / `PORT`: deployment-platform overrides
    /// - `DEEPGRAM_API_KEY`: provider credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("DEEPGRAM_API_KEY") {
            settings = settings.set_override("provider.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup beats failing on the first
    /// client connection.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !self.provider.url.starts_with("ws://") && !self.provider.url.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "Provider URL must be a ws:// or wss:// endpoint"
            ));
        }

        if self.relay.max_sessions == 0 {
            return Err(anyhow::anyhow!("Max relay sessions must be greater than 0"));
        }

        if self.relay.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Heartbeat interval must be greater than 0"
            ));
        }

        if self.relay.client_timeout_secs <= self.relay.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout must exceed the heartbeat interval"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.provider.model, "nova");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_port_zero() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_non_ws_provider_url() {
        let mut config = AppConfig::default();
        config.provider.url = "https://api.deepgram.com/v1/listen".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_bad_timeouts() {
        let mut config = AppConfig::default();
        config.relay.heartbeat_interval_secs = 60;
        config.relay.client_timeout_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_options_come_from_config() {
        let config = AppConfig::default();
        let options = config.provider.options();
        assert_eq!(options.language, "en");
        assert!(options.punctuate);
        assert!(options.smart_format);
        assert_eq!(options.model, "nova");
    }
}
