//! # Stagehand Configuration
//!
//! Typed configuration for the orchestration core. Every section has defaults,
//! so an absent file yields a usable configuration; files and environment
//! variables only override what they name.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stagehand_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let retries = manager.config().admission.max_race_retries;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::models::ExecutionEngine;
use serde::{Deserialize, Serialize};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagehandConfig {
    pub orchestration: OrchestrationConfig,
    pub admission: AdmissionConfig,
    pub launcher: LauncherConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Identity of this worker, stamped on every execution it launches
    pub executing_instance: String,
    pub default_execution_engine: ExecutionEngine,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            executing_instance: "localhost".to_string(),
            default_execution_engine: ExecutionEngine::V3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub enabled: bool,
    /// How many times the launcher re-runs an admission decision that lost a race
    pub max_race_retries: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_race_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Providers whose stage types are used unsuffixed in ad-hoc orchestrations
    pub default_provider_types: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            default_provider_types: vec!["aws".to_string(), "titus".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

impl StagehandConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.orchestration.executing_instance.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "orchestration.executing_instance",
                "orchestration configuration",
            ));
        }

        if self.admission.max_race_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                "admission.max_race_retries",
                "0",
                "at least one admission attempt is required",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Whether stage types for `provider` should carry a `_<provider>` suffix
    pub fn is_non_default_provider(&self, provider: &str) -> bool {
        !self
            .launcher
            .default_provider_types
            .iter()
            .any(|default| default == provider)
    }
}
