//! Service Configuration Settings
//!
//! Configuration types for the market stream service, loaded from
//! environment variables. Absent or unparseable values fall back to
//! defaults; values that parse but make no sense are rejected.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::application::services::{BroadcastLoopConfig, RegistryConfig};
use crate::domain::streaming::Symbol;

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port for HTTP and WebSocket traffic.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerSettings {
    /// Resolve the bind address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the host is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|_| ConfigError::InvalidValue {
            key: "MARKET_STREAM_HOST".to_string(),
            reason: format!("'{}' is not an IP address", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Broadcast loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Period between ticks.
    pub interval: Duration,
    /// Upper bound on a single symbol fetch.
    pub fetch_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            fetch_timeout: Duration::from_millis(500),
        }
    }
}

impl From<BroadcastSettings> for BroadcastLoopConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            interval: settings.interval,
            fetch_timeout: settings.fetch_timeout,
        }
    }
}

/// Connection registry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            outbound_capacity: 256,
        }
    }
}

impl From<RegistrySettings> for RegistryConfig {
    fn from(settings: RegistrySettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            outbound_capacity: settings.outbound_capacity,
        }
    }
}

/// Simulated market data feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSettings {
    /// Symbols the feed publishes.
    pub symbols: Vec<Symbol>,
    /// Time between random-walk steps.
    pub step_interval: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            symbols: parse_symbol_list(DEFAULT_SIM_SYMBOLS),
            step_interval: Duration::from_millis(250),
        }
    }
}

const DEFAULT_SIM_SYMBOLS: &str = "EURUSD,GBPUSD,USDJPY,XAUUSD";

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Broadcast loop settings.
    pub broadcast: BroadcastSettings,
    /// Connection registry settings.
    pub registry: RegistrySettings,
    /// Simulated feed settings.
    pub simulation: SimulationSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerSettings {
            host: lookup("MARKET_STREAM_HOST")
                .map_or(defaults.server.host, |h| h.trim().to_string()),
            port: parse_env_u16(&lookup, "MARKET_STREAM_PORT", defaults.server.port),
        };

        let broadcast = BroadcastSettings {
            interval: parse_env_duration_millis(
                &lookup,
                "MARKET_STREAM_BROADCAST_INTERVAL_MS",
                defaults.broadcast.interval,
            ),
            fetch_timeout: parse_env_duration_millis(
                &lookup,
                "MARKET_STREAM_FETCH_TIMEOUT_MS",
                defaults.broadcast.fetch_timeout,
            ),
        };

        let registry = RegistrySettings {
            max_connections: parse_env_usize(
                &lookup,
                "MARKET_STREAM_MAX_CONNECTIONS",
                defaults.registry.max_connections,
            ),
            outbound_capacity: parse_env_usize(
                &lookup,
                "MARKET_STREAM_OUTBOUND_CAPACITY",
                defaults.registry.outbound_capacity,
            ),
        };

        let simulation = SimulationSettings {
            symbols: lookup("MARKET_STREAM_SIM_SYMBOLS")
                .map_or(defaults.simulation.symbols, |raw| parse_symbol_list(&raw)),
            step_interval: parse_env_duration_millis(
                &lookup,
                "MARKET_STREAM_SIM_INTERVAL_MS",
                defaults.simulation.step_interval,
            ),
        };

        let config = Self {
            server,
            broadcast,
            registry,
            simulation,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot be used.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::EmptyValue("MARKET_STREAM_HOST".to_string()));
        }
        require_non_zero(
            "MARKET_STREAM_BROADCAST_INTERVAL_MS",
            self.broadcast.interval.as_millis(),
        )?;
        require_non_zero(
            "MARKET_STREAM_FETCH_TIMEOUT_MS",
            self.broadcast.fetch_timeout.as_millis(),
        )?;
        require_non_zero(
            "MARKET_STREAM_MAX_CONNECTIONS",
            self.registry.max_connections as u128,
        )?;
        require_non_zero(
            "MARKET_STREAM_OUTBOUND_CAPACITY",
            self.registry.outbound_capacity as u128,
        )?;
        require_non_zero(
            "MARKET_STREAM_SIM_INTERVAL_MS",
            self.simulation.step_interval.as_millis(),
        )?;
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable parsed but is not usable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn require_non_zero(key: &str, value: u128) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn parse_symbol_list(raw: &str) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = raw.split(',').filter_map(Symbol::parse).collect();
    symbols.dedup();
    symbols
}

fn parse_env_u16<F>(lookup: &F, key: &str, default: u16) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
