//! Signing public key reconstruction and signature verification

use crate::coefficients::{
    lagrange_coefficient, CoefficientSet, ParticipatingSet, MASTER_SHARE_INDEX,
};
use crate::field::{point_coordinates, point_from_coordinates, SCALAR_LEN};
use crate::types::{NodeIndex, Signature};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use k256::{
    ecdsa::{signature::hazmat::PrehashVerifier, VerifyingKey},
    elliptic_curve::Group,
    ProjectivePoint, Scalar,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};

/// Final signing public key as fixed-width big-endian affine coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPublicKey {
    #[serde(with = "hex_coordinate")]
    pub x: [u8; SCALAR_LEN],
    #[serde(with = "hex_coordinate")]
    pub y: [u8; SCALAR_LEN],
}

impl AggregatedPublicKey {
    pub fn from_point(point: &ProjectivePoint) -> Result<Self> {
        let (x, y) = point_coordinates(point)?;
        Ok(Self { x, y })
    }

    pub fn to_point(&self) -> Result<ProjectivePoint> {
        point_from_coordinates(&self.x, &self.y)
    }

    /// Base64 of `x || y` (64 bytes), the form sent to signer nodes
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        if bytes.len() != 2 * SCALAR_LEN {
            return Err(Error::Deserialization(format!(
                "public key must be {} bytes, got {}",
                2 * SCALAR_LEN,
                bytes.len()
            )));
        }
        let mut x = [0u8; SCALAR_LEN];
        let mut y = [0u8; SCALAR_LEN];
        x.copy_from_slice(&bytes[..SCALAR_LEN]);
        y.copy_from_slice(&bytes[SCALAR_LEN..]);
        let key = Self { x, y };
        key.to_point()?;
        Ok(key)
    }

    /// `x || y`
    pub fn to_bytes(&self) -> [u8; 2 * SCALAR_LEN] {
        let mut bytes = [0u8; 2 * SCALAR_LEN];
        bytes[..SCALAR_LEN].copy_from_slice(&self.x);
        bytes[SCALAR_LEN..].copy_from_slice(&self.y);
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_affine(self.to_point()?.to_affine())
            .map_err(|e| Error::Consistency(format!("unusable public key: {}", e)))
    }

    /// Recover the key from `(digest, signature)` and check it is this key,
    /// then check the signature verifies under this key. Both must hold.
    pub fn verify(&self, digest: &[u8; 32], signature: &Signature) -> Result<()> {
        let (sig, recovery_id) = signature.to_k256()?;
        let expected = self.verifying_key()?;

        let recovered = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
            .map_err(|e| Error::Consistency(format!("invalid signature: recovery failed: {}", e)))?;
        let recovered = AggregatedPublicKey::from_point(&ProjectivePoint::from(*recovered.as_affine()))?;
        if !bool::from(recovered.to_bytes().ct_eq(&self.to_bytes())) {
            return Err(Error::Consistency(
                "invalid signature: recovered public key does not match".into(),
            ));
        }

        expected
            .verify_prehash(digest, &sig)
            .map_err(|e| Error::Consistency(format!("invalid signature: {}", e)))
    }
}

/// Combine the DKG group key with the client share's public point:
/// `Y = λ₁·G_dkg + λᵤ·U` over `{1, u}` at 0.
///
/// The result is cross-checked by recombining the same two points with the
/// weights implied by the DKLS coefficient set the nodes will receive.
#[instrument(skip(group_public_key, client_share_public_key))]
pub fn reconcile(
    group_public_key: &ProjectivePoint,
    client_share_public_key: &ProjectivePoint,
    client_share_index: u32,
    participating: &[NodeIndex],
) -> Result<AggregatedPublicKey> {
    let set = ParticipatingSet::new(participating.to_vec())?;
    let coefficients = CoefficientSet::derive(&set, client_share_index)?;

    let master = [MASTER_SHARE_INDEX, client_share_index];
    let server_weight = lagrange_coefficient(&master, MASTER_SHARE_INDEX, 0)?;
    let client_weight = lagrange_coefficient(&master, client_share_index, 0)?;
    let direct = *group_public_key * server_weight + *client_share_public_key * client_weight;

    if bool::from(direct.is_identity()) {
        return Err(Error::Consistency("signing public key is the identity".into()));
    }

    let recombined = recombine(
        group_public_key,
        client_share_public_key,
        &set,
        &coefficients,
    )?;
    let key = AggregatedPublicKey::from_point(&direct)?;
    let check = AggregatedPublicKey::from_point(&recombined)?;
    if !bool::from(key.to_bytes().ct_eq(&check.to_bytes())) {
        return Err(Error::Consistency(
            "public key does not match the derived coefficient set".into(),
        ));
    }

    debug!(public_key = %key.to_hex(), "Reconciled signing public key");
    Ok(key)
}

/// Undo the denormalisation: each coefficient times its DKLS Lagrange weight
/// is the party's additive weight. Server weights sum to λ₁ because the
/// node Lagrange coefficients at 0 sum to one.
fn recombine(
    group_public_key: &ProjectivePoint,
    client_share_public_key: &ProjectivePoint,
    set: &ParticipatingSet,
    coefficients: &CoefficientSet,
) -> Result<ProjectivePoint> {
    let party_ids = set.party_ids();

    let client_weight =
        lagrange_coefficient(&party_ids, set.client_party_id(), 0)? * coefficients.client();

    let mut server_weight = Scalar::ZERO;
    for (node, coeff) in coefficients.servers() {
        server_weight += lagrange_coefficient(&party_ids, set.party_id(node)?, 0)? * coeff;
    }

    Ok(*group_public_key * server_weight + *client_share_public_key * client_weight)
}

mod hex_coordinate {
    use super::SCALAR_LEN;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; SCALAR_LEN], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; SCALAR_LEN], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let digits = encoded.strip_prefix("0x").unwrap_or(&encoded);
        if digits.len() > SCALAR_LEN * 2 {
            return Err(serde::de::Error::custom("coordinate longer than 32 bytes"));
        }
        let padded = format!("{:0>width$}", digits, width = SCALAR_LEN * 2);
        let bytes = hex::decode(padded).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid coordinate length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::scalar_from_index;
    use crate::sim::SimulatedSharing;
    use crate::types::HashAlgorithm;
    use k256::ecdsa::SigningKey;
    use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};

    #[test]
    fn test_reconcile_matches_simulated_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let sharing = SimulatedSharing::generate(&mut rng, 3, 3, 3).unwrap();

        let key = reconcile(
            &sharing.group_public_key(),
            &sharing.client_share_public_key(),
            sharing.client_share_index,
            &[1, 2, 3],
        )
        .unwrap();

        assert_eq!(key.to_point().unwrap(), sharing.public_key());
    }

    /// Combining the real shares' public points with their additive weights
    /// must land on the reconciled key.
    #[test]
    fn test_reconcile_equals_sum_of_weighted_share_points() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let sharing = SimulatedSharing::generate(&mut rng, 3, 3, 2).unwrap();
        let set = ParticipatingSet::new(vec![1, 2, 3]).unwrap();
        let coefficients = CoefficientSet::derive(&set, 2).unwrap();
        let party_ids = set.party_ids();

        let mut sum = ProjectivePoint::GENERATOR
            * (lagrange_coefficient(&party_ids, set.client_party_id(), 0).unwrap()
                * coefficients.client()
                * sharing.client_share);
        for (node, share) in &sharing.server_shares {
            let weight = lagrange_coefficient(&party_ids, set.party_id(*node).unwrap(), 0).unwrap()
                * coefficients.server(*node).unwrap();
            sum += ProjectivePoint::GENERATOR * (weight * share);
        }

        let key = reconcile(
            &sharing.group_public_key(),
            &sharing.client_share_public_key(),
            2,
            set.indexes(),
        )
        .unwrap();
        assert_eq!(AggregatedPublicKey::from_point(&sum).unwrap(), key);
    }

    #[test]
    fn test_reconcile_rejects_bad_set() {
        let point = ProjectivePoint::GENERATOR;
        assert!(matches!(
            reconcile(&point, &point, 3, &[1, 1, 2]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_base64_round_trip_is_fixed_width() {
        let point = ProjectivePoint::GENERATOR * scalar_from_index(1234);
        let key = AggregatedPublicKey::from_point(&point).unwrap();
        let encoded = key.to_base64();
        assert_eq!(encoded.len(), 88);
        assert_eq!(AggregatedPublicKey::from_base64(&encoded).unwrap(), key);
    }

    #[test]
    fn test_verify_accepts_valid_and_rejects_foreign_key() {
        let signing_key = SigningKey::from_bytes(&scalar_from_index(99).to_bytes()).unwrap();
        let digest = HashAlgorithm::Keccak256.digest(b"hello world");
        let (sig, recovery_id) = signing_key.sign_prehash_recoverable(&digest).unwrap();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig.r().to_bytes());
        s.copy_from_slice(&sig.s().to_bytes());
        let signature = Signature::new(r, s, recovery_id.to_byte());

        let own = AggregatedPublicKey::from_point(&(ProjectivePoint::GENERATOR * scalar_from_index(99))).unwrap();
        let other = AggregatedPublicKey::from_point(&(ProjectivePoint::GENERATOR * scalar_from_index(98))).unwrap();

        own.verify(&digest, &signature).unwrap();
        assert!(matches!(
            other.verify(&digest, &signature),
            Err(Error::Consistency(_))
        ));
    }
}
