//! Registration information and canonical key derivation

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Path separator for keys and hierarchical node paths.
pub const SEPARATOR: &str = "/";

/// Payload handed to a backend at register time and delivered to consumers.
pub type RegistryData = HashMap<String, String>;

/// Registered information definition.
///
/// The canonical key derived from these fields indexes both the backend
/// resource and the local subscription table, so equal values always yield
/// the same key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryInfo {
    pub host: String,
    pub port: u16,
    /// Ordered path segments, de-duplicated on insertion
    pub paths: Vec<String>,
    /// Query parameters, serialized in key order
    pub parameters: BTreeMap<String, String>,
}

impl RegistryInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Append a path segment. A segment already present is ignored.
    pub fn with_path(mut self, segment: impl Into<String>) -> Self {
        let segment = segment.into();
        if !self.paths.contains(&segment) {
            self.paths.push(segment);
        }
        self
    }

    /// Append several path segments in order.
    pub fn with_paths<I, S>(self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        segments.into_iter().fold(self, |info, s| info.with_path(s))
    }

    /// Set a query parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Build the canonical key:
    /// `<type>://<host>:<port>/<seg1>/.../<segN>[?<k1>=<v1>&...]`.
    pub fn service_key(&self, registry_type: &str) -> Result<String> {
        if registry_type.is_empty() {
            return Err(RegistryError::IllegalArgument("type is null".to_string()));
        }
        self.validate_paths()?;

        let mut url = format!(
            "{}://{}:{}{}{}",
            registry_type,
            self.host,
            self.port,
            SEPARATOR,
            self.paths.join(SEPARATOR)
        );

        if !self.parameters.is_empty() {
            let query = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }

        Ok(url)
    }

    /// Hierarchical node path, e.g. `/shenyu/registry/service/test`.
    pub fn node_path(&self) -> Result<String> {
        if self.paths.is_empty() {
            return Err(RegistryError::IllegalArgument("paths is empty".to_string()));
        }
        self.validate_paths()?;
        Ok(format!("{}{}", SEPARATOR, self.paths.join(SEPARATOR)))
    }

    fn validate_paths(&self) -> Result<()> {
        if self.paths.iter().any(|p| p.is_empty()) {
            return Err(RegistryError::IllegalArgument(
                "path segment is empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Display for RegistryInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.service_key("todo") {
            Ok(key) => write!(f, "{}", key),
            Err(_) => write!(f, "{}:{}/{:?}", self.host, self.port, self.paths),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RegistryInfo {
        RegistryInfo::new("127.0.0.1", 4331).with_paths(["shenyu", "registry", "service", "test"])
    }

    #[test]
    fn test_service_key_without_parameters() {
        assert_eq!(
            sample().service_key("zookeeper").unwrap(),
            "zookeeper://127.0.0.1:4331/shenyu/registry/service/test"
        );
    }

    #[test]
    fn test_service_key_parameters_sorted() {
        let info = sample()
            .with_parameter("version", "1.0")
            .with_parameter("app", "demo");
        assert_eq!(
            info.service_key("nacos").unwrap(),
            "nacos://127.0.0.1:4331/shenyu/registry/service/test?app=demo&version=1.0"
        );
    }

    #[test]
    fn test_service_key_empty_type() {
        let err = sample().service_key("").unwrap_err();
        assert!(matches!(err, RegistryError::IllegalArgument(_)));
    }

    #[test]
    fn test_service_key_empty_segment() {
        let info = RegistryInfo::new("127.0.0.1", 80).with_path("a").with_path("");
        assert!(info.service_key("zookeeper").is_err());
        assert!(info.node_path().is_err());
    }

    #[test]
    fn test_service_key_no_paths() {
        let info = RegistryInfo::new("localhost", 9195);
        assert_eq!(
            info.service_key("nacos").unwrap(),
            "nacos://localhost:9195/"
        );
        assert!(info.node_path().is_err());
    }

    #[test]
    fn test_with_path_deduplicates() {
        let info = RegistryInfo::new("h", 1).with_paths(["a", "b", "a"]);
        assert_eq!(info.paths, vec!["a", "b"]);
    }

    #[test]
    fn test_node_path() {
        assert_eq!(sample().node_path().unwrap(), "/shenyu/registry/service/test");
    }

    #[test]
    fn test_display_uses_placeholder_type() {
        assert_eq!(
            sample().to_string(),
            "todo://127.0.0.1:4331/shenyu/registry/service/test"
        );
    }
}
