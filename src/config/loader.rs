//! Configuration Loader
//!
//! Environment-aware loading: `stagehand.toml`, then an optional
//! `stagehand.<env>.toml` overlay, then `STAGEHAND__SECTION__KEY` variables.

use super::error::{ConfigResult, ConfigurationError};
use super::StagehandConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENVIRONMENT_VARIABLE: &str = "STAGEHAND_ENV";
const ENV_PREFIX: &str = "STAGEHAND";
const BASE_FILE_STEM: &str = "stagehand";

pub struct ConfigManager {
    config: StagehandConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load from a specific directory with an explicit environment, without
    /// touching process-wide environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            executing_instance = %config.orchestration.executing_instance,
            admission_enabled = config.admission.enabled,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Build a manager around an already-constructed configuration
    pub fn from_config(config: StagehandConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &StagehandConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "development".to_string())
    }

    fn load_and_merge_config(directory: &Path, environment: &str) -> ConfigResult<StagehandConfig> {
        let base = directory.join(format!("{BASE_FILE_STEM}.toml"));
        let overlay = directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        if overlay.exists() {
            debug!(path = %overlay.display(), "Applying environment overlay");
        }

        Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|built| built.try_deserialize::<StagehandConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionEngine;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.config(), &StagehandConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_overlay_overrides_base() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("stagehand.toml"),
            r#"
[orchestration]
executing_instance = "worker-a"
default_execution_engine = "v2"

[admission]
max_race_retries = 5
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("stagehand.production.toml"),
            r#"
[orchestration]
executing_instance = "worker-prod"
"#,
        )
        .unwrap();

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "production",
        )
        .unwrap();
        let config = manager.config();

        assert_eq!(config.orchestration.executing_instance, "worker-prod");
        assert_eq!(config.orchestration.default_execution_engine, ExecutionEngine::V2);
        assert_eq!(config.admission.max_race_retries, 5);
        assert!(config.admission.enabled);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("stagehand.toml"),
            "[events]\nchannel_capacity = 0\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_malformed_file_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stagehand.toml"), "[admission\nenabled = ").unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(result, Err(ConfigurationError::LoadError { .. })));
    }
}
