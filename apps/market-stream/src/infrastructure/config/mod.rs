//! Configuration Module
//!
//! Configuration loading for the market stream service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, RegistrySettings, ServerSettings, SimulationSettings,
    StreamConfig,
};
