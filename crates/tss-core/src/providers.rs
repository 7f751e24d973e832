//! Collaborators consumed by the ceremony
//!
//! Key custody, identity attestation and endpoint discovery are owned by
//! other subsystems. The ceremony only sees these traits; the local
//! implementations below are backed by files or configuration.

use crate::config::NetworkConfig;
use crate::field::{point_from_sec1, scalar_from_hex};
use crate::mpc::async_trait;
use crate::session::{slot_node_index, PartyLayout};
use crate::types::{NodeIndex, PartyIndex};
use crate::{Error, Result};
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Custody of the client share and the DKG group key
#[async_trait]
pub trait KeyCustody: Send + Sync {
    /// Unlock the client share with a factor secret: `(raw share, share index)`
    async fn get_share(&self, factor_secret: &Scalar) -> Result<(Scalar, u32)>;

    /// DKG public key of the server half for a tag and nonce
    async fn get_group_public_key(&self, tss_tag: &str, tss_nonce: u32) -> Result<ProjectivePoint>;

    /// Current nonce of a tag
    async fn tss_nonce(&self, tss_tag: &str) -> Result<u32>;
}

/// Signed proof that the verifier identity was authenticated out-of-band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Opaque signed session tokens, forwarded verbatim to every node
    pub signatures: Vec<String>,
    /// Nodes taking part, in slot order
    pub node_indexes: Vec<NodeIndex>,
}

/// Identity attestation / share retrieval
#[async_trait]
pub trait IdentityAttestation: Send + Sync {
    async fn fetch_attestation(
        &self,
        verifier_name: &str,
        verifier_id: &str,
        network: &str,
    ) -> Result<Attestation>;
}

/// Endpoint discovery
#[async_trait]
pub trait EndpointDirectory: Send + Sync {
    async fn resolve(
        &self,
        network: &str,
        parties: usize,
        client_index: PartyIndex,
        node_indexes: &[NodeIndex],
    ) -> Result<PartyLayout>;
}

/// Share entry unlocked by one factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorShare {
    /// Hex scalar
    pub share: String,
    pub share_index: u32,
}

/// Custody document: everything a client stores for basic signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyDocument {
    pub tss_tag: String,
    pub tss_nonce: u32,
    /// SEC1 hex of the DKG group public key
    pub group_public_key: String,
    /// Compressed SEC1 hex of the factor public key → share
    pub factors: BTreeMap<String, FactorShare>,
}

/// Custody backed by an in-memory or on-disk [`CustodyDocument`]
#[derive(Debug, Clone)]
pub struct LocalCustody {
    document: CustodyDocument,
}

impl LocalCustody {
    pub fn new(document: CustodyDocument) -> Self {
        Self { document }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Custody(format!("cannot read {}: {}", path.display(), e)))?;
        let document = serde_json::from_str(&json)
            .map_err(|e| Error::Custody(format!("invalid {}: {}", path.display(), e)))?;
        Ok(Self::new(document))
    }

    pub fn document(&self) -> &CustodyDocument {
        &self.document
    }

    fn check_tag(&self, tss_tag: &str) -> Result<()> {
        if tss_tag != self.document.tss_tag {
            return Err(Error::Custody(format!("unknown tss tag {:?}", tss_tag)));
        }
        Ok(())
    }
}

/// Lookup key of a factor: compressed public point, hex
pub fn factor_id(factor_secret: &Scalar) -> String {
    hex::encode(crate::field::point_to_sec1(
        &(ProjectivePoint::GENERATOR * factor_secret),
    ))
}

#[async_trait]
impl KeyCustody for LocalCustody {
    async fn get_share(&self, factor_secret: &Scalar) -> Result<(Scalar, u32)> {
        let id = factor_id(factor_secret);
        let entry = self
            .document
            .factors
            .get(&id)
            .ok_or_else(|| Error::Custody("no share stored for this factor".into()))?;
        let share = scalar_from_hex(&entry.share)
            .map_err(|e| Error::Custody(format!("stored share unreadable: {}", e)))?;
        debug!(share_index = entry.share_index, "Unlocked client share");
        Ok((share, entry.share_index))
    }

    async fn get_group_public_key(&self, tss_tag: &str, tss_nonce: u32) -> Result<ProjectivePoint> {
        self.check_tag(tss_tag)?;
        if tss_nonce != self.document.tss_nonce {
            return Err(Error::Custody(format!(
                "no group key for nonce {} of tag {:?}",
                tss_nonce, tss_tag
            )));
        }
        let bytes = hex::decode(&self.document.group_public_key)
            .map_err(|e| Error::Custody(e.to_string()))?;
        point_from_sec1(&bytes).map_err(|e| Error::Custody(e.to_string()))
    }

    async fn tss_nonce(&self, tss_tag: &str) -> Result<u32> {
        self.check_tag(tss_tag)?;
        Ok(self.document.tss_nonce)
    }
}

/// Attestation result fixed up front (recorded from an earlier retrieval)
#[derive(Debug, Clone)]
pub struct StaticAttestation {
    attestation: Attestation,
}

impl StaticAttestation {
    pub fn new(attestation: Attestation) -> Self {
        Self { attestation }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Attestation(format!("cannot read {}: {}", path.display(), e)))?;
        let attestation = serde_json::from_str(&json)
            .map_err(|e| Error::Attestation(format!("invalid {}: {}", path.display(), e)))?;
        Ok(Self::new(attestation))
    }
}

#[async_trait]
impl IdentityAttestation for StaticAttestation {
    async fn fetch_attestation(
        &self,
        verifier_name: &str,
        verifier_id: &str,
        network: &str,
    ) -> Result<Attestation> {
        debug!(verifier_name, verifier_id, network, "Using recorded attestation");
        if self.attestation.signatures.is_empty() {
            return Err(Error::Attestation("no session signatures".into()));
        }
        Ok(self.attestation.clone())
    }
}

/// Directory over statically configured networks
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    networks: BTreeMap<String, NetworkConfig>,
}

impl StaticDirectory {
    pub fn new(networks: BTreeMap<String, NetworkConfig>) -> Self {
        Self { networks }
    }
}

#[async_trait]
impl EndpointDirectory for StaticDirectory {
    async fn resolve(
        &self,
        network: &str,
        parties: usize,
        client_index: PartyIndex,
        node_indexes: &[NodeIndex],
    ) -> Result<PartyLayout> {
        let config = self
            .networks
            .get(network)
            .ok_or_else(|| Error::Configuration(format!("unknown network {:?}", network)))?;

        let mut layout = PartyLayout {
            rpc_endpoints: Vec::with_capacity(parties),
            socket_endpoints: Vec::with_capacity(parties),
            party_indexes: Vec::with_capacity(parties),
        };

        for slot in 0..parties {
            layout.party_indexes.push(slot);
            if slot == client_index {
                layout.rpc_endpoints.push(None);
                layout.socket_endpoints.push(None);
                continue;
            }

            let position = slot_node_index(node_indexes, slot) as usize - 1;
            let missing = || {
                Error::Configuration(format!(
                    "network {:?} has no endpoint at position {}",
                    network, position
                ))
            };
            let rpc = config.node_tss_endpoints.get(position).ok_or_else(missing)?;
            let socket = config.node_endpoints.get(position).ok_or_else(missing)?;

            layout.rpc_endpoints.push(Some(rpc.clone()));
            layout.socket_endpoints.push(Some(endpoint_origin(socket)?));
        }

        Ok(layout)
    }
}

/// `scheme://authority` of an endpoint URL
pub fn endpoint_origin(url: &str) -> Result<String> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::Configuration(format!("endpoint {:?} has no scheme", url)))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if scheme.is_empty() || authority.is_empty() {
        return Err(Error::Configuration(format!("endpoint {:?} has no host", url)));
    }
    Ok(format!("{}://{}", scheme, authority))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::scalar_from_index;

    fn devnet() -> StaticDirectory {
        let nodes = 5;
        let network = NetworkConfig {
            node_tss_endpoints: (1..=nodes)
                .map(|i| format!("https://node-{}.example.dev/tss", i))
                .collect(),
            node_endpoints: (1..=nodes)
                .map(|i| format!("https://node-{}.example.dev/sss/jrpc", i))
                .collect(),
        };
        StaticDirectory::new(BTreeMap::from([("devnet".to_string(), network)]))
    }

    #[tokio::test]
    async fn test_resolve_maps_node_indexes() {
        let layout = devnet().resolve("devnet", 4, 3, &[2, 4, 5]).await.unwrap();

        assert_eq!(layout.party_indexes, vec![0, 1, 2, 3]);
        assert_eq!(layout.rpc_endpoints[0].as_deref(), Some("https://node-2.example.dev/tss"));
        assert_eq!(layout.socket_endpoints[1].as_deref(), Some("https://node-4.example.dev"));
        assert_eq!(layout.socket_endpoints[3], None);
        assert_eq!(layout.rpc_endpoints[3], None);
        layout.validate(4, 3).unwrap();
    }

    #[tokio::test]
    async fn test_resolve_defaults_to_position() {
        let layout = devnet().resolve("devnet", 4, 3, &[]).await.unwrap();
        assert_eq!(layout.rpc_endpoints[2].as_deref(), Some("https://node-3.example.dev/tss"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_network() {
        let result = devnet().resolve("mainnet", 4, 3, &[1, 2, 3]).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_endpoint_origin() {
        assert_eq!(
            endpoint_origin("https://node.example.dev:8443/sss/jrpc?x=1").unwrap(),
            "https://node.example.dev:8443"
        );
        assert!(endpoint_origin("node.example.dev").is_err());
    }

    #[tokio::test]
    async fn test_local_custody_unlocks_by_factor() {
        let factor = scalar_from_index(77);
        let custody = LocalCustody::new(CustodyDocument {
            tss_tag: "default".into(),
            tss_nonce: 0,
            group_public_key: hex::encode(crate::field::point_to_sec1(&ProjectivePoint::GENERATOR)),
            factors: BTreeMap::from([(
                factor_id(&factor),
                FactorShare {
                    share: "0x2a".into(),
                    share_index: 3,
                },
            )]),
        });

        let (share, index) = custody.get_share(&factor).await.unwrap();
        assert_eq!(share, scalar_from_index(42));
        assert_eq!(index, 3);

        assert!(matches!(
            custody.get_share(&scalar_from_index(78)).await,
            Err(Error::Custody(_))
        ));
        assert!(custody.get_group_public_key("default", 1).await.is_err());
        assert_eq!(
            custody.get_group_public_key("default", 0).await.unwrap(),
            ProjectivePoint::GENERATOR
        );
    }

    #[tokio::test]
    async fn test_static_attestation_requires_signatures() {
        let attestation = StaticAttestation::new(Attestation {
            signatures: vec![],
            node_indexes: vec![1, 2, 3],
        });
        assert!(matches!(
            attestation.fetch_attestation("v", "id", "devnet").await,
            Err(Error::Attestation(_))
        ));
    }
}
