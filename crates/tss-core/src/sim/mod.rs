//! Simulated deployment: dealer-generated keys, in-memory signer nodes and
//! recorded collaborators.
//!
//! Used by the test suite, the `simulate` command of the party binary and
//! the node service. None of it is secure; see [`engine`].

pub mod dealer;
pub mod engine;
pub mod node;

pub use dealer::SimulatedSharing;
pub use engine::{DealerEngine, DealerPayload};
pub use node::{NodeShare, SimulatedNode};

use crate::ceremony::{Collaborators, Signer};
use crate::config::{NetworkConfig, SignerConfig};
use crate::field::{point_to_sec1, scalar_to_hex};
use crate::mpc::MemoryNetwork;
use crate::providers::{
    factor_id, Attestation, CustodyDocument, FactorShare, LocalCustody, StaticAttestation,
    StaticDirectory,
};
use crate::session::{client_party_index, DEFAULT_TSS_TAG};
use crate::types::NodeIndex;
use crate::Result;
use k256::{NonZeroScalar, Scalar};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use std::sync::Arc;
use zeroize::Zeroize;

/// Network name every simulated deployment registers
pub const SIMULATED_NETWORK: &str = "simulated";

/// Client share index used unless a test picks another
pub const DEFAULT_CLIENT_SHARE_INDEX: u32 = 2;

/// In-memory endpoint of a node
pub fn node_endpoint(node: NodeIndex) -> String {
    format!("mem://node-{}", node)
}

/// Endpoints for `node_count` nodes following `base(node)`
pub fn network_config(node_count: usize, base: impl Fn(NodeIndex) -> String) -> NetworkConfig {
    let nodes = 1..=node_count as NodeIndex;
    NetworkConfig {
        node_tss_endpoints: nodes.clone().map(|n| format!("{}/tss", base(n))).collect(),
        node_endpoints: nodes.map(|n| format!("{}/sss/jrpc", base(n))).collect(),
    }
}

/// A whole signing deployment living in memory
pub struct SimulatedDeployment {
    pub sharing: SimulatedSharing,
    pub config: SignerConfig,
    pub network: Arc<MemoryNetwork>,
    pub custody: CustodyDocument,
    pub attestation: Attestation,
    factor_secret: Scalar,
}

impl SimulatedDeployment {
    /// `parties - 1` nodes, all of them participating
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R, parties: usize) -> Result<Self> {
        let servers = client_party_index(parties)?;
        Self::with_participants(
            rng,
            servers,
            (1..=servers as NodeIndex).collect(),
            DEFAULT_CLIENT_SHARE_INDEX,
        )
    }

    /// `node_count` nodes of which `participating` take part in signing
    pub fn with_participants<R: RngCore + CryptoRng>(
        rng: &mut R,
        node_count: usize,
        participating: Vec<NodeIndex>,
        client_share_index: u32,
    ) -> Result<Self> {
        let sharing =
            SimulatedSharing::generate(&mut *rng, node_count, participating.len(), client_share_index)?;

        let network = MemoryNetwork::new();
        for (node, share) in &sharing.server_shares {
            network.add_node(&node_endpoint(*node), SimulatedNode::new(*node, *share));
        }

        let factor_secret = *NonZeroScalar::random(&mut *rng);
        let custody = CustodyDocument {
            tss_tag: DEFAULT_TSS_TAG.to_string(),
            tss_nonce: 0,
            group_public_key: hex::encode(point_to_sec1(&sharing.group_public_key())),
            factors: BTreeMap::from([(
                factor_id(&factor_secret),
                FactorShare {
                    share: scalar_to_hex(&sharing.client_share),
                    share_index: client_share_index,
                },
            )]),
        };

        let attestation = Attestation {
            signatures: participating
                .iter()
                .map(|node| format!("{{\"node\":{},\"signature\":\"simulated\"}}", node))
                .collect(),
            node_indexes: participating.clone(),
        };

        let config = SignerConfig::new(
            SIMULATED_NETWORK,
            participating.len() + 1,
            "simulated-verifier",
            "alice@example.com",
        )
        .with_network(SIMULATED_NETWORK, network_config(node_count, node_endpoint));

        Ok(Self {
            sharing,
            config,
            network: Arc::new(network),
            custody,
            attestation,
            factor_secret,
        })
    }

    pub fn factor_secret(&self) -> &Scalar {
        &self.factor_secret
    }

    /// Share files for every node, for hosting them out of process
    pub fn node_shares(&self) -> Vec<NodeShare> {
        self.sharing
            .server_shares
            .iter()
            .map(|(node, share)| NodeShare {
                node_index: *node,
                share: scalar_to_hex(share),
            })
            .collect()
    }

    /// Fresh collaborators over this deployment's memory network
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            custody: Arc::new(LocalCustody::new(self.custody.clone())),
            attestation: Arc::new(StaticAttestation::new(self.attestation.clone())),
            directory: Arc::new(StaticDirectory::new(self.config.networks.clone())),
            transport: self.network.clone(),
            engine: Arc::new(DealerEngine::new()),
        }
    }

    pub fn signer(&self) -> Signer {
        Signer::new(self.config.clone(), self.factor_secret, self.collaborators())
    }
}

impl Drop for SimulatedDeployment {
    fn drop(&mut self) {
        self.factor_secret.zeroize();
    }
}
