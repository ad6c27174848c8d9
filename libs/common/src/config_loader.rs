//! Layered configuration loading
//!
//! Sources are merged in this order, later ones winning:
//! 1. Defaults from `T::default()`
//! 2. Optional configuration file (YAML, TOML or JSON, chosen by extension)
//! 3. Environment variables `<PREFIX>_<KEY>`, with `__` separating nested keys

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Build the figment for `T` without extracting it
pub fn figment_for<T>(config_file: Option<&Path>, env_prefix: &str) -> Result<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(Error::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::config("Config file must have an extension"))?;

        figment = match extension {
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "toml" => figment.merge(Toml::file(path)),
            "json" => figment.merge(Json::file(path)),
            other => {
                return Err(Error::config(format!(
                    "Unsupported config file format: {}",
                    other
                )))
            },
        };
        info!("Loading configuration from: {}", path.display());
    } else {
        debug!("No configuration file given, using defaults and environment");
    }

    let prefix = format!("{}_", env_prefix.to_uppercase());
    Ok(figment.merge(Env::prefixed(&prefix).split("__")))
}

/// Load a configuration of type `T`
pub fn load_config<T>(config_file: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + Default + for<'de> Deserialize<'de>,
{
    figment_for::<T>(config_file, env_prefix)?
        .extract()
        .map_err(|e| Error::config(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct TestConfig {
        name: String,
        port: u16,
        nested: Nested,
    }

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct Nested {
        enabled: bool,
        level: String,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                port: 1234,
                nested: Nested::default(),
            }
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let cfg: TestConfig = load_config(None, "CFGTEST_NONE").unwrap();
        assert_eq!(cfg, TestConfig::default());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "port: 4000\nnested:\n  enabled: true").unwrap();

        let cfg: TestConfig = load_config(Some(file.path()), "CFGTEST_YAML").unwrap();
        assert_eq!(cfg.name, "default");
        assert_eq!(cfg.port, 4000);
        assert!(cfg.nested.enabled);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("app.yaml", "port: 4000\nnested:\n  level: info")?;
            jail.set_env("CFGTEST_PORT", "5000");
            jail.set_env("CFGTEST_NESTED__LEVEL", "debug");

            let cfg: TestConfig = load_config(Some(Path::new("app.yaml")), "cfgtest")
                .map_err(|e| e.to_string())?;
            assert_eq!(cfg.port, 5000);
            assert_eq!(cfg.nested.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: Result<TestConfig> =
            load_config(Some(Path::new("/nonexistent/swap.yaml")), "CFGTEST_MISSING");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let result: Result<TestConfig> = load_config(Some(file.path()), "CFGTEST_INI");
        assert!(result.is_err());
    }
}
