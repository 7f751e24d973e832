//! Trusted-dealer key generation for simulations
//!
//! Produces the same key shape a real deployment ends up with after DKG and
//! client share creation: a server master secret Shamir-shared across the
//! nodes, and a client share on the line through `(1, S)` and `(0, key)`.

use crate::coefficients::MASTER_SHARE_INDEX;
use crate::field::scalar_from_index;
use crate::types::NodeIndex;
use crate::{Error, Result};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::{CryptoRng, RngCore};

/// Shares of a freshly dealt key
#[derive(Clone)]
pub struct SimulatedSharing {
    /// Signing key, `λ₁·S + λᵤ·U`
    pub private_key: Scalar,
    /// Server master secret `S`
    pub server_master: Scalar,
    /// Shamir shares of `S`, by node index
    pub server_shares: Vec<(NodeIndex, Scalar)>,
    /// Client share `U`
    pub client_share: Scalar,
    pub client_share_index: u32,
}

impl SimulatedSharing {
    /// Deal a key to `node_count` nodes with a `threshold`-of-`node_count`
    /// sharing of the server master secret.
    pub fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        node_count: usize,
        threshold: usize,
        client_share_index: u32,
    ) -> Result<Self> {
        if threshold < 2 || threshold > node_count {
            return Err(Error::Configuration(format!(
                "cannot deal a {}-of-{} sharing",
                threshold, node_count
            )));
        }
        if client_share_index == 0 || client_share_index == MASTER_SHARE_INDEX {
            return Err(Error::Configuration(format!(
                "client share index {} is reserved",
                client_share_index
            )));
        }

        let private_key = Scalar::random(&mut *rng);
        let server_master = Scalar::random(&mut *rng);

        let mut polynomial = Vec::with_capacity(threshold);
        polynomial.push(server_master);
        for _ in 1..threshold {
            polynomial.push(Scalar::random(&mut *rng));
        }

        let server_shares = (1..=node_count as NodeIndex)
            .map(|node| (node, evaluate(&polynomial, &scalar_from_index(node))))
            .collect();

        // line through (0, key) and (1, S), evaluated at u
        let client_share =
            private_key + (server_master - private_key) * scalar_from_index(client_share_index);

        Ok(Self {
            private_key,
            server_master,
            server_shares,
            client_share,
            client_share_index,
        })
    }

    /// DKG group key, `S·G`
    pub fn group_public_key(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * self.server_master
    }

    pub fn client_share_public_key(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * self.client_share
    }

    /// Signing public key
    pub fn public_key(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * self.private_key
    }

    pub fn share_of(&self, node: NodeIndex) -> Option<Scalar> {
        self.server_shares
            .iter()
            .find(|(index, _)| *index == node)
            .map(|(_, share)| *share)
    }
}

fn evaluate(polynomial: &[Scalar], x: &Scalar) -> Scalar {
    polynomial
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coefficients::lagrange_coefficient;
    use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};

    #[test]
    fn test_any_threshold_subset_recovers_master() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let sharing = SimulatedSharing::generate(&mut rng, 5, 3, 3).unwrap();

        for subset in [[1u32, 2, 3], [2, 4, 5], [1, 3, 5]] {
            let mut master = Scalar::ZERO;
            for node in subset {
                master += lagrange_coefficient(&subset, node, 0).unwrap()
                    * sharing.share_of(node).unwrap();
            }
            assert_eq!(master, sharing.server_master);
        }
    }

    #[test]
    fn test_client_share_completes_the_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let sharing = SimulatedSharing::generate(&mut rng, 3, 3, 4).unwrap();
        let master = [MASTER_SHARE_INDEX, 4];

        let key = lagrange_coefficient(&master, 1, 0).unwrap() * sharing.server_master
            + lagrange_coefficient(&master, 4, 0).unwrap() * sharing.client_share;
        assert_eq!(key, sharing.private_key);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        assert!(SimulatedSharing::generate(&mut rng, 3, 4, 3).is_err());
        assert!(SimulatedSharing::generate(&mut rng, 3, 1, 3).is_err());
        assert!(SimulatedSharing::generate(&mut rng, 3, 3, 1).is_err());
        assert!(SimulatedSharing::generate(&mut rng, 3, 3, 0).is_err());
    }
}
