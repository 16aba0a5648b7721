//! Registry client configuration
//!
//! Loaded from an optional YAML/TOML file, then overridden by environment
//! variables such as `BATATA_REGISTRY__SERVER_LISTS` or
//! `BATATA_REGISTRY__PROPS__NAMESPACE`.

use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

const ENV_PREFIX: &str = "BATATA_REGISTRY";
const ENV_SEPARATOR: &str = "__";

/// Backend connection settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend name, e.g. `zookeeper` or `nacos`
    pub registry_type: String,
    /// Comma separated server addresses
    pub server_lists: String,
    /// Backend specific properties
    pub props: HashMap<String, String>,
}

impl RegistryConfig {
    pub fn new(registry_type: &str, server_lists: &str) -> Self {
        Self {
            registry_type: registry_type.to_string(),
            server_lists: server_lists.to_string(),
            props: HashMap::new(),
        }
    }

    /// Set a backend property
    pub fn with_prop(mut self, key: &str, value: &str) -> Self {
        self.props.insert(key.to_string(), value.to_string());
        self
    }

    /// Load configuration from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::build(path, None)
    }

    fn build(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .source(env),
        );

        let config: RegistryConfig = builder.build()?.try_deserialize()?;
        if config.server_lists.trim().is_empty() {
            return Err(RegistryError::Config("server_lists is empty".to_string()));
        }
        Ok(config)
    }

    /// Server addresses, trimmed, empty entries removed.
    pub fn server_addrs(&self) -> Vec<String> {
        self.server_lists
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Property lookup. Keys match case-insensitively since environment
    /// overrides arrive lowercased.
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str).or_else(|| {
            self.props
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn prop_or(&self, key: &str, default: &str) -> String {
        self.prop(key).unwrap_or(default).to_string()
    }

    /// Numeric property with a default; a present but unparsable value is an error.
    pub fn prop_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.prop(key) {
            Some(v) => v.trim().parse().map_err(|_| {
                RegistryError::Config(format!("property '{}' is not a number: {}", key, v))
            }),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_and_props() {
        let config = RegistryConfig::new("nacos", "127.0.0.1:8848, 127.0.0.2:8848,")
            .with_prop("username", "nacos")
            .with_prop("sessionTimeout", "30000");

        assert_eq!(
            config.server_addrs(),
            vec!["127.0.0.1:8848".to_string(), "127.0.0.2:8848".to_string()]
        );
        assert_eq!(config.prop("username"), Some("nacos"));
        assert_eq!(config.prop("SESSIONTIMEOUT"), Some("30000"));
        assert_eq!(config.prop_u64("sessionTimeout", 1).unwrap(), 30000);
        assert_eq!(config.prop_u64("connectionTimeout", 3000).unwrap(), 3000);
        assert_eq!(config.prop_or("namespace", "public"), "public");
    }

    #[test]
    fn test_invalid_number_prop() {
        let config = RegistryConfig::new("nacos", "x").with_prop("beatInterval", "soon");
        assert!(matches!(
            config.prop_u64("beatInterval", 5000),
            Err(RegistryError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "registry_type: zookeeper\nserver_lists: 127.0.0.1:2181\nprops:\n  sessionTimeout: \"30000\""
        )
        .unwrap();

        let config = RegistryConfig::build(Some(file.path()), Some(HashMap::new())).unwrap();
        assert_eq!(config.registry_type, "zookeeper");
        assert_eq!(config.server_addrs(), vec!["127.0.0.1:2181".to_string()]);
        assert_eq!(config.prop_u64("sessionTimeout", 0).unwrap(), 30000);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "registry_type: nacos\nserver_lists: 127.0.0.1:8848").unwrap();

        let env = HashMap::from([
            (
                "BATATA_REGISTRY__SERVER_LISTS".to_string(),
                "10.0.0.1:8848".to_string(),
            ),
            (
                "BATATA_REGISTRY__PROPS__NAMESPACE".to_string(),
                "dev".to_string(),
            ),
        ]);

        let config = RegistryConfig::build(Some(file.path()), Some(env)).unwrap();
        assert_eq!(config.registry_type, "nacos");
        assert_eq!(config.server_lists, "10.0.0.1:8848");
        assert_eq!(config.prop("namespace"), Some("dev"));
    }

    #[test]
    fn test_missing_server_lists() {
        let err = RegistryConfig::build(None, Some(HashMap::new())).unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }
}
