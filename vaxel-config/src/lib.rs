//! # Vaxel Configuration System
//!
//! Hierarchical configuration management for the Vaxel event stack.
//!
//! ## Features
//! - **Unified Configuration**: Single source of truth across all components
//! - **Validation**: Runtime validation of every capacity and interval
//! - **Environment Awareness**: `VAXEL_*` environment overrides for deployment

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod core;
mod delivery;
mod error;
mod maintenance;
mod telemetry;
mod validation;

pub use self::core::CoreConfig;
pub use self::core::PoolConfig;
pub use self::core::QueueConfig;
pub use delivery::DeliveryConfig;
pub use error::ConfigError;
pub use maintenance::MaintenanceConfig;
pub use telemetry::TelemetryConfig;

/// Top-level configuration container for all Vaxel components.
#[derive(Debug, Serialize, Deserialize, Validate, Default)]
pub struct VaxelConfig {
    /// Core resource budgets (event pool, global queue, switch count).
    #[validate(nested)]
    pub core: CoreConfig,

    /// Local delivery registration parameters.
    #[validate(nested)]
    pub delivery: DeliveryConfig,

    /// MAC-table maintenance scheduling parameters.
    #[validate(nested)]
    pub maintenance: MaintenanceConfig,

    /// Telemetry and observability configuration.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl VaxelConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/vaxel.yaml` - base stack settings. If missing, defaults are used.
    /// 3. `VAXEL_*` environment variables (`__` separates nesting levels).
    pub fn load() -> Result<Self, ConfigError> {
        // Start with defaults.
        let mut figment = Figment::from(Serialized::defaults(VaxelConfig::default()));

        if Path::new("config/vaxel.yaml").exists() {
            figment = figment.merge(Yaml::file("config/vaxel.yaml"));
        }

        figment
            .merge(Env::prefixed("VAXEL_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Re-checks every validation rule; used when a config was built in code
    /// rather than loaded.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        self.validate()?;
        Ok(())
    }

    /// Load configuration from a specific path for testing/validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(
                path.to_string_lossy().to_string(),
            )));
        }

        Figment::from(Serialized::defaults(VaxelConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("VAXEL_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_validation() {
        let config = VaxelConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn rejects_zero_pool_capacity() {
        let mut config = VaxelConfig::default();
        config.core.event_pool.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_subsecond_aging_interval() {
        let mut config = VaxelConfig::default();
        config.maintenance.aging_interval_ms = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let path = std::env::temp_dir().join("vaxel-config-test.yaml");
        std::fs::write(
            &path,
            "core:\n  global_queue:\n    capacity: 512\nmaintenance:\n  aging_interval_ms: 250\n",
        )
        .unwrap();

        let config = VaxelConfig::load_from_path(&path).unwrap();
        assert_eq!(config.core.global_queue.capacity, 512);
        assert_eq!(config.maintenance.aging_interval_ms, 250);
        // Untouched sections keep their defaults.
        assert_eq!(config.delivery.local_queue_capacity, 128);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = VaxelConfig::load_from_path("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
