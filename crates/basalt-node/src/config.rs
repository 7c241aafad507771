//! Node configuration.

use anyhow::{Context, Result};
use basalt_net::parse_endpoint;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default p2p listen endpoint.
fn default_listen_endpoint() -> String {
    format!("0.0.0.0:{}", basalt_net::DEFAULT_PORT)
}

/// Default agent string.
fn default_agent_name() -> String {
    "basalt-node".to_string()
}

/// Default seconds between dead-connection sweeps.
fn default_cleanup_period() -> u64 {
    10
}

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The `host:port` used to listen for incoming p2p connections.
    /// Empty disables listening.
    #[serde(default = "default_listen_endpoint")]
    pub listen_endpoint: String,

    /// Externally accessible `host:port` identifying this node. Defaults to
    /// the listen endpoint, with the machine hostname substituted when the
    /// listen host is a wildcard address.
    #[serde(default)]
    pub server_address: Option<String>,

    /// Public endpoints of peers to dial. Repeatable.
    #[serde(default)]
    pub peers: Vec<String>,

    /// The name supplied to identify this node amongst its peers.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Maximum number of accepted clients, 0 for no limit. Carried for the
    /// outer layers; the core does not enforce admission.
    #[serde(default)]
    pub max_clients: usize,

    /// Seconds between sweeps of dead connections and expired transactions.
    #[serde(default = "default_cleanup_period")]
    pub connection_cleanup_period: u64,

    /// Fixed node id as 64 hex characters. Random when absent.
    #[serde(default)]
    pub node_id: Option<String>,

    /// Chain id as 64 hex characters. Zero when absent.
    #[serde(default)]
    pub chain_id: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_endpoint: default_listen_endpoint(),
            server_address: None,
            peers: Vec::new(),
            agent_name: default_agent_name(),
            max_clients: 0,
            connection_cleanup_period: default_cleanup_period(),
            node_id: None,
            chain_id: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The endpoint this node advertises in its hello.
    ///
    /// An explicit `server_address` wins. Otherwise the listen endpoint is
    /// used as-is unless its host is a wildcard, in which case the machine
    /// hostname replaces it.
    pub fn public_endpoint(&self) -> String {
        if let Some(server_address) = &self.server_address {
            return server_address.clone();
        }
        let is_wildcard = self.listen_endpoint.starts_with("0.0.0.0:")
            || self.listen_endpoint.starts_with("[::]:");
        if !is_wildcard {
            return self.listen_endpoint.clone();
        }
        let port = parse_endpoint(&self.listen_endpoint)
            .map(|(_, port)| port)
            .unwrap_or(basalt_net::DEFAULT_PORT);
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("{host}:{port}")
    }
}
