//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production default values. `#[serde(default)]`
//! allows partial JSON — missing fields keep their defaults during
//! deserialization.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Crew client.
///
/// Loaded from `~/.crew/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrewSettings {
    /// Settings schema version.
    pub version: String,
    /// Backend connection settings.
    pub backend: BackendSettings,
    /// Orchestration runtime settings.
    pub runtime: RuntimeSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for CrewSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            backend: BackendSettings::default(),
            runtime: RuntimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl CrewSettings {
    /// Reject values that would misbehave at runtime. Env overrides are
    /// range-checked at parse time; file values are checked here.
    pub fn validate(&self) -> Result<()> {
        if self.backend.port == 0 {
            return Err(SettingsError::InvalidValue(
                "backend.port must be nonzero".to_string(),
            ));
        }
        if self.backend.max_clients == 0 {
            return Err(SettingsError::InvalidValue(
                "backend.maxClients must be nonzero".to_string(),
            ));
        }
        if self.runtime.max_subagents_per_round == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.maxSubagentsPerRound must be nonzero".to_string(),
            ));
        }
        if self.runtime.max_rounds == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.maxRounds must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backend connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Backend host.
    pub host: String,
    /// Backend TCP port.
    pub port: u16,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum concurrent protocol clients (lead + subagents).
    pub max_clients: usize,
    /// Default model requested on `conversation/create`.
    pub default_model: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9257,
            connect_timeout_ms: 10_000,
            max_clients: 8,
            default_model: "default".to_string(),
        }
    }
}

/// Orchestration runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Per-subagent wall-clock timeout in milliseconds.
    pub subagent_timeout_ms: u64,
    /// Maximum delegated tasks accepted per round.
    pub max_subagents_per_round: usize,
    /// Maximum delegation rounds per user message (guards runaway
    /// follow-up loops).
    pub max_rounds: u32,
    /// Event bus buffer capacity per subscriber.
    pub event_buffer: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            subagent_timeout_ms: 300_000,
            max_subagents_per_round: 8,
            max_rounds: 10,
            event_buffer: 1024,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace` | `debug` | `info` | `warn` | `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
