//! Layered process configuration (§3.H): compiled defaults, an optional
//! TOML file, then `OBSCTL_*` environment variables, in that order of
//! increasing precedence, built on the `config` crate's layering.

use serde::{Deserialize, Serialize};

/// Binds one instrument's logical device roles to concrete device names
/// (the `type:module/unit` form `obs_core::name::DeviceName::unparse`
/// produces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub ccd: String,
    pub cooler: Option<String>,
    pub filter_wheel: Option<String>,
    pub focuser: Option<String>,
    pub mount: Option<String>,
    pub guide_port: Option<String>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        InstrumentConfig {
            ccd: "ccd:sim/cam0".to_string(),
            cooler: Some("cooler:sim/cooler0".to_string()),
            filter_wheel: Some("filterwheel:sim/wheel0".to_string()),
            focuser: Some("focuser:sim/focuser0".to_string()),
            mount: Some("mount:sim/mount0".to_string()),
            guide_port: Some("guideport:sim/guideport0".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub image_repository_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database_url: "obsctl.sqlite".to_string(),
            image_repository_dir: "images".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub log_level: String,
    pub scheduler_poll_interval_ms: u64,
    pub storage: StorageConfig,
    pub instruments: std::collections::HashMap<String, InstrumentConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut instruments = std::collections::HashMap::new();
        instruments.insert("scope1".to_string(), InstrumentConfig::default());
        Settings {
            bind_addr: "0.0.0.0:4000".to_string(),
            log_level: "info".to_string(),
            scheduler_poll_interval_ms: 500,
            storage: StorageConfig::default(),
            instruments,
        }
    }
}

impl Settings {
    /// Builds the layered configuration: compiled [`Settings::default`],
    /// then `config_file` if present, then any `OBSCTL_*` environment
    /// variable (double-underscore separated for nested fields, e.g.
    /// `OBSCTL_STORAGE__DATABASE_URL`).
    pub fn load(config_file: Option<&str>) -> Result<Settings, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?);
        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OBSCTL")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_settings_has_one_instrument() {
        let settings = Settings::default();
        assert!(settings.instruments.contains_key("scope1"));
    }

    #[test]
    fn test_load_with_no_file_returns_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_env_override_wins_over_default() {
        std::env::set_var("OBSCTL_BIND_ADDR", "127.0.0.1:9000");
        let settings = Settings::load(None).unwrap();
        std::env::remove_var("OBSCTL_BIND_ADDR");
        assert_eq!(settings.bind_addr, "127.0.0.1:9000");
    }
}
