//! Signer configuration
//!
//! Passed explicitly to [`crate::Signer::new`]; nothing here is global.

use crate::session::{client_party_index, DEFAULT_TSS_TAG};
use crate::{Error, Result, DEFAULT_PARTIES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Endpoints of one signer network, indexed by `node_index - 1`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// RPC endpoint of every node
    pub node_tss_endpoints: Vec<String>,
    /// Base endpoint of every node; reduced to its origin for WebSockets
    pub node_endpoints: Vec<String>,
}

/// Configuration of a signing client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Network name, looked up in `networks`
    pub network: String,

    /// Total number of parties including the client
    #[serde(default = "default_parties")]
    pub parties: usize,

    /// Verifier (login provider) name
    pub verifier: String,

    /// User identifier at the verifier
    pub verifier_id: String,

    /// Key tag
    #[serde(default = "default_tss_tag")]
    pub tss_tag: String,

    /// Bound on opening each connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Bound on each fan-in barrier (readiness, fragments)
    #[serde(default = "default_round_timeout")]
    pub round_timeout_secs: u64,

    /// Bound on the cleanup acknowledgement
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,

    /// Known signer networks
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

fn default_parties() -> usize {
    DEFAULT_PARTIES
}

fn default_tss_tag() -> String {
    DEFAULT_TSS_TAG.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_round_timeout() -> u64 {
    60
}

fn default_cleanup_timeout() -> u64 {
    10
}

impl SignerConfig {
    /// Configuration with default tag and timeouts
    pub fn new(network: &str, parties: usize, verifier: &str, verifier_id: &str) -> Self {
        Self {
            network: network.to_string(),
            parties,
            verifier: verifier.to_string(),
            verifier_id: verifier_id.to_string(),
            tss_tag: default_tss_tag(),
            connect_timeout_secs: default_connect_timeout(),
            round_timeout_secs: default_round_timeout(),
            cleanup_timeout_secs: default_cleanup_timeout(),
            networks: BTreeMap::new(),
        }
    }

    /// Register a network
    pub fn with_network(mut self, name: &str, network: NetworkConfig) -> Self {
        self.networks.insert(name.to_string(), network);
        self
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: SignerConfig = serde_json::from_str(&json)
            .map_err(|e| Error::Configuration(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        client_party_index(self.parties)?;
        if self.verifier.is_empty() || self.verifier_id.is_empty() {
            return Err(Error::Configuration("verifier and verifier id are required".into()));
        }
        if self.connect_timeout_secs == 0
            || self.round_timeout_secs == 0
            || self.cleanup_timeout_secs == 0
        {
            return Err(Error::Configuration("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}
