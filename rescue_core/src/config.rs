//! String-keyed configuration shipped to components at handshake time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key for the port the kernel dials to reach the GIS service.
pub const GIS_PORT_KEY: &str = "gis.port";

/// A flat key/value configuration map with typed getters.
///
/// The kernel sends its configuration to every component inside `ConnectOk`,
/// so a component can read kernel-side tuning without a second exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Returns the raw value for a key.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns a key parsed as an integer, if present and well-formed.
    pub fn int_value(&self, key: &str) -> Option<i64> {
        self.value(key)?.parse().ok()
    }

    /// Returns a key parsed as a float, if present and well-formed.
    pub fn f64_value(&self, key: &str) -> Option<f64> {
        self.value(key)?.parse().ok()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no keys are set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let mut config = Config::new();
        config.set(GIS_PORT_KEY, 7000);
        config.set("kernel.tick-seconds", 60.0);
        config.set("kernel.name", "kernel");

        assert_eq!(config.int_value(GIS_PORT_KEY), Some(7000));
        assert_eq!(config.f64_value("kernel.tick-seconds"), Some(60.0));
        assert_eq!(config.value("kernel.name"), Some("kernel"));
        assert_eq!(config.int_value("kernel.name"), None);
        assert_eq!(config.int_value("missing"), None);
    }

    #[test]
    fn test_serde_round() {
        let mut config = Config::new();
        config.set(GIS_PORT_KEY, 7000);
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
