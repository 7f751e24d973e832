//! Lagrange and DKLS coefficient derivation
//!
//! The signing key is a 2-point interpolation between the server master
//! secret `S` (at x = 1, itself Shamir-shared among the signer nodes at
//! their DKG indexes) and the client share (at x = u):
//!
//! ```text
//! key = λ₁·S + λᵤ·share_u            with λ over {1, u} evaluated at 0
//! S   = Σ λᵢ·s_i                     with λ over the participating nodes
//! ```
//!
//! The DKLS engine expects a Shamir sharing over party ids `1..=k+1` (k
//! servers, then the client), so every additive weight is divided by the
//! party's own Lagrange weight in that set ("denormalised"). Every party
//! must derive exactly the same values; any divergence surfaces as a
//! consistency failure on the signer nodes or at verification.

use crate::field::{invert, scalar_from_index, scalar_to_hex};
use crate::types::NodeIndex;
use crate::{Error, Result};
use k256::Scalar;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// x-coordinate of the server master secret in the client/server split
pub const MASTER_SHARE_INDEX: u32 = 1;

/// Minimum number of participating signer nodes
pub const MIN_PARTICIPATING_SERVERS: usize = 2;

/// Lagrange basis coefficient for `target` over `indexes`, evaluated at `at`:
/// ∏_{j ≠ target} (at − j) / (target − j) mod n
pub fn lagrange_coefficient(indexes: &[u32], target: u32, at: u32) -> Result<Scalar> {
    if indexes.len() < 2 {
        return Err(Error::Configuration(format!(
            "interpolation needs at least 2 indexes, got {}",
            indexes.len()
        )));
    }
    ensure_distinct(indexes)?;
    if !indexes.contains(&target) {
        return Err(Error::Configuration(format!(
            "index {} is not part of {:?}",
            target, indexes
        )));
    }

    let at = scalar_from_index(at);
    let target_scalar = scalar_from_index(target);
    let mut upper = Scalar::ONE;
    let mut lower = Scalar::ONE;

    for &j in indexes.iter().filter(|&&j| j != target) {
        let j = scalar_from_index(j);
        upper *= at - j;
        lower *= target_scalar - j;
    }

    Ok(upper * invert(&lower)?)
}

fn ensure_distinct(indexes: &[u32]) -> Result<()> {
    let mut seen = HashSet::with_capacity(indexes.len());
    for &index in indexes {
        if !seen.insert(index) {
            return Err(Error::Configuration(format!(
                "duplicate index {} in {:?}",
                index, indexes
            )));
        }
    }
    Ok(())
}

/// Ordered set of signer nodes taking part in a ceremony
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipatingSet(Vec<NodeIndex>);

impl ParticipatingSet {
    /// Validate a node index sequence: at least two nodes, no zero, no
    /// duplicates, strictly ascending.
    pub fn new(indexes: Vec<NodeIndex>) -> Result<Self> {
        if indexes.len() < MIN_PARTICIPATING_SERVERS {
            return Err(Error::Configuration(format!(
                "at least {} participating nodes required, got {}",
                MIN_PARTICIPATING_SERVERS,
                indexes.len()
            )));
        }
        if indexes.contains(&0) {
            return Err(Error::Configuration("node index 0 is reserved".into()));
        }
        ensure_distinct(&indexes)?;
        if indexes.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(Error::Configuration(format!(
                "participating node indexes must be sorted, got {:?}",
                indexes
            )));
        }
        Ok(Self(indexes))
    }

    pub fn indexes(&self) -> &[NodeIndex] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// DKLS party id (1-based position) of a participating node
    pub fn party_id(&self, node: NodeIndex) -> Result<u32> {
        self.0
            .iter()
            .position(|&index| index == node)
            .map(|position| position as u32 + 1)
            .ok_or_else(|| {
                Error::Configuration(format!("node {} is not participating", node))
            })
    }

    /// DKLS party id of the client: one past the last server
    pub fn client_party_id(&self) -> u32 {
        self.0.len() as u32 + 1
    }

    /// All DKLS party ids, servers first, client last
    pub fn party_ids(&self) -> Vec<u32> {
        (1..=self.client_party_id()).collect()
    }
}

fn validate_client_share_index(client_share_index: u32) -> Result<()> {
    if client_share_index == 0 || client_share_index == MASTER_SHARE_INDEX {
        return Err(Error::Configuration(format!(
            "client share index {} collides with a reserved index",
            client_share_index
        )));
    }
    Ok(())
}

/// Coefficient that turns a party's raw share into its DKLS input.
///
/// With `is_client` the result applies to the client share at
/// `client_share_index`; otherwise `server_index` names the node whose DKG
/// share it applies to.
pub fn derive_coefficient(
    is_client: bool,
    participating: &[NodeIndex],
    client_share_index: u32,
    server_index: Option<NodeIndex>,
) -> Result<Scalar> {
    let set = ParticipatingSet::new(participating.to_vec())?;
    validate_client_share_index(client_share_index)?;

    if is_client {
        client_coefficient(&set, client_share_index)
    } else {
        let server = server_index.ok_or_else(|| {
            Error::Configuration("server coefficient requested without a server index".into())
        })?;
        server_coefficient(&set, client_share_index, server)
    }
}

fn client_coefficient(set: &ParticipatingSet, client_share_index: u32) -> Result<Scalar> {
    let master = [MASTER_SHARE_INDEX, client_share_index];
    let additive = lagrange_coefficient(&master, client_share_index, 0)?;
    let denormalise = lagrange_coefficient(&set.party_ids(), set.client_party_id(), 0)?;
    Ok(additive * invert(&denormalise)?)
}

fn server_coefficient(
    set: &ParticipatingSet,
    client_share_index: u32,
    server: NodeIndex,
) -> Result<Scalar> {
    let party_id = set.party_id(server)?;
    let master = [MASTER_SHARE_INDEX, client_share_index];

    let server_lagrange = lagrange_coefficient(set.indexes(), server, 0)?;
    let master_lagrange = lagrange_coefficient(&master, MASTER_SHARE_INDEX, 0)?;
    let denormalise = lagrange_coefficient(&set.party_ids(), party_id, 0)?;

    Ok(server_lagrange * master_lagrange * invert(&denormalise)?)
}

/// Coefficients of every participant of one ceremony
#[derive(Clone, PartialEq, Eq)]
pub struct CoefficientSet {
    client: Scalar,
    servers: BTreeMap<NodeIndex, Scalar>,
}

impl CoefficientSet {
    /// Derive the client coefficient and one coefficient per participating node
    pub fn derive(set: &ParticipatingSet, client_share_index: u32) -> Result<Self> {
        validate_client_share_index(client_share_index)?;

        let client = client_coefficient(set, client_share_index)?;
        let servers = set
            .indexes()
            .iter()
            .map(|&node| Ok((node, server_coefficient(set, client_share_index, node)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        debug!(
            servers = ?set.indexes(),
            client_share_index,
            "Derived coefficient set"
        );

        Ok(Self { client, servers })
    }

    pub fn client(&self) -> &Scalar {
        &self.client
    }

    pub fn server(&self, node: NodeIndex) -> Option<&Scalar> {
        self.servers.get(&node)
    }

    pub fn servers(&self) -> impl Iterator<Item = (NodeIndex, &Scalar)> {
        self.servers.iter().map(|(&node, coeff)| (node, coeff))
    }

    /// Wire form sent to every signer node: node index → 64-char hex
    pub fn server_coefficients_hex(&self) -> BTreeMap<NodeIndex, String> {
        self.servers
            .iter()
            .map(|(&node, coeff)| (node, scalar_to_hex(coeff)))
            .collect()
    }
}

impl std::fmt::Debug for CoefficientSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoefficientSet")
            .field("client", &scalar_to_hex(&self.client))
            .field("servers", &self.server_coefficients_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::elliptic_curve::Field;
    use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};

    #[test]
    fn test_lagrange_two_points() {
        // over {1, 2} at 0: λ₁ = 2, λ₂ = -1
        assert_eq!(lagrange_coefficient(&[1, 2], 1, 0).unwrap(), scalar_from_index(2));
        assert_eq!(lagrange_coefficient(&[1, 2], 2, 0).unwrap(), -Scalar::ONE);
    }

    #[test]
    fn test_lagrange_evaluated_at_own_index() {
        assert_eq!(lagrange_coefficient(&[1, 3, 4], 3, 3).unwrap(), Scalar::ONE);
        assert_eq!(lagrange_coefficient(&[1, 3, 4], 4, 3).unwrap(), Scalar::ZERO);
    }

    #[test]
    fn test_lagrange_rejects_bad_input() {
        assert!(matches!(
            lagrange_coefficient(&[1, 2, 2], 1, 0),
            Err(Error::Configuration(_))
        ));
        assert!(lagrange_coefficient(&[1], 1, 0).is_err());
        assert!(lagrange_coefficient(&[1, 2], 3, 0).is_err());
    }

    #[test]
    fn test_participating_set_validation() {
        assert!(ParticipatingSet::new(vec![1, 2, 3]).is_ok());
        assert!(matches!(
            ParticipatingSet::new(vec![1, 2, 2]),
            Err(Error::Configuration(msg)) if msg.contains("duplicate")
        ));
        assert!(ParticipatingSet::new(vec![3, 1, 2]).is_err());
        assert!(ParticipatingSet::new(vec![0, 1]).is_err());
        assert!(ParticipatingSet::new(vec![4]).is_err());
    }

    #[test]
    fn test_party_ids() {
        let set = ParticipatingSet::new(vec![2, 4, 5]).unwrap();
        assert_eq!(set.party_id(4).unwrap(), 2);
        assert_eq!(set.client_party_id(), 4);
        assert_eq!(set.party_ids(), vec![1, 2, 3, 4]);
        assert!(set.party_id(3).is_err());
    }

    #[test]
    fn test_derive_coefficient_deterministic() {
        for servers in [vec![1, 2, 3], vec![2, 4, 5], vec![1, 5]] {
            for &u in &[2u32, 3, 7] {
                let a = derive_coefficient(true, &servers, u, None).unwrap();
                let b = derive_coefficient(true, &servers, u, None).unwrap();
                assert_eq!(a, b);

                for &node in &servers {
                    let a = derive_coefficient(false, &servers, u, Some(node)).unwrap();
                    let b = derive_coefficient(false, &servers, u, Some(node)).unwrap();
                    assert_eq!(a, b);
                }
            }
        }
    }

    #[test]
    fn test_duplicate_index_fails_before_arithmetic() {
        let result = derive_coefficient(true, &[1, 1, 2], 3, None);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_reserved_client_index_rejected() {
        assert!(derive_coefficient(true, &[1, 2, 3], 1, None).is_err());
        assert!(derive_coefficient(true, &[1, 2, 3], 0, None).is_err());
        assert!(derive_coefficient(false, &[1, 2, 3], 3, None).is_err());
    }

    #[test]
    fn test_set_matches_single_derivation() {
        let set = ParticipatingSet::new(vec![1, 3, 4]).unwrap();
        let coefficients = CoefficientSet::derive(&set, 2).unwrap();

        assert_eq!(
            *coefficients.client(),
            derive_coefficient(true, set.indexes(), 2, None).unwrap()
        );
        for &node in set.indexes() {
            assert_eq!(
                *coefficients.server(node).unwrap(),
                derive_coefficient(false, set.indexes(), 2, Some(node)).unwrap()
            );
        }
        assert!(coefficients
            .server_coefficients_hex()
            .values()
            .all(|hex| hex.len() == 64));
    }

    /// Weighting every denormalised share by its DKLS Lagrange coefficient
    /// must reconstruct the signing key.
    #[test]
    fn test_denormalised_shares_interpolate_to_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let key = Scalar::random(&mut rng);
        let master = Scalar::random(&mut rng);
        let slope = Scalar::random(&mut rng);
        let u = 3u32;

        // server polynomial S + slope·x, client share on the line through (0, key), (1, S)
        let node_share = |node: u32| master + slope * scalar_from_index(node);
        let client_share = key + (master - key) * scalar_from_index(u);

        let set = ParticipatingSet::new(vec![1, 2, 3]).unwrap();
        let coefficients = CoefficientSet::derive(&set, u).unwrap();
        let party_ids = set.party_ids();

        let mut combined = lagrange_coefficient(&party_ids, set.client_party_id(), 0).unwrap()
            * coefficients.client()
            * client_share;
        for (node, coeff) in coefficients.servers() {
            let party_id = set.party_id(node).unwrap();
            combined += lagrange_coefficient(&party_ids, party_id, 0).unwrap()
                * coeff
                * node_share(node);
        }

        assert_eq!(combined, key);
    }
}
