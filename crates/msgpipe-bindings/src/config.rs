use msgpipe_system::DEFAULT_MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Connector`](crate::Connector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Largest message accepted in either direction. Default: 16 MiB.
    pub max_message_size: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConnectorConfig {
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

/// Configuration for a [`Router`](crate::Router).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Highest interface version this side implements. Peers requiring a
    /// newer version get disconnected.
    pub interface_version: u32,
    pub connector: ConnectorConfig,
}

impl RouterConfig {
    pub fn with_interface_version(mut self, interface_version: u32) -> Self {
        self.interface_version = interface_version;
        self
    }

    pub fn with_connector(mut self, connector: ConnectorConfig) -> Self {
        self.connector = connector;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RouterConfig = serde_json::from_str(r#"{"interface_version": 3}"#).unwrap();
        assert_eq!(config.interface_version, 3);
        assert_eq!(config.connector.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn builders_chain() {
        let config = RouterConfig::default()
            .with_interface_version(2)
            .with_connector(ConnectorConfig::default().with_max_message_size(1024));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["interface_version"], 2);
        assert_eq!(json["connector"]["max_message_size"], 1024);
    }
}
