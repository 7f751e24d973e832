//! Core types shared by the ceremony and its collaborators

use crate::field::{reduce_bytes, scalar_to_bytes, SCALAR_LEN};
use crate::{Error, Result};
use k256::{
    ecdsa,
    elliptic_curve::{point::AffineCoordinates, scalar::IsHigh},
    FieldBytes, ProjectivePoint, Scalar,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Slot of a participant in a session. Servers occupy `0..P-1`, the client
/// is always the last slot (see [`crate::client_party_index`]).
pub type PartyIndex = usize;

/// DKG index of a remote signer node, 1-based
pub type NodeIndex = u32;

/// ECDSA signature (r, s) with recovery id, always in low-s form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// R component
    pub r: [u8; 32],
    /// S component
    pub s: [u8; 32],
    /// Recovery ID (0..=3)
    pub recovery_id: u8,
}

impl Signature {
    /// Create a new signature
    pub fn new(r: [u8; 32], s: [u8; 32], recovery_id: u8) -> Self {
        Self { r, s, recovery_id }
    }

    /// Build a signature from the combined nonce point `R = k·G` and the
    /// combined `s`, normalising to low-s and adjusting the recovery id.
    pub fn from_nonce_point(nonce_point: &ProjectivePoint, s: Scalar) -> Result<Self> {
        let affine = nonce_point.to_affine();
        let x = affine.x();
        let mut x_bytes = [0u8; SCALAR_LEN];
        x_bytes.copy_from_slice(x.as_slice());

        let r = reduce_bytes(&x_bytes);
        if bool::from(r.is_zero()) || bool::from(s.is_zero()) {
            return Err(Error::Consistency("degenerate signature component".into()));
        }

        let x_reduced = scalar_to_bytes(&r) != x_bytes;
        let mut y_odd = bool::from(affine.y_is_odd());
        let s = if bool::from(s.is_high()) {
            y_odd = !y_odd;
            -s
        } else {
            s
        };

        let recovery_id = u8::from(y_odd) | (u8::from(x_reduced) << 1);
        Ok(Self::new(scalar_to_bytes(&r), scalar_to_bytes(&s), recovery_id))
    }

    /// Convert into `k256` signature and recovery id
    pub fn to_k256(&self) -> Result<(ecdsa::Signature, ecdsa::RecoveryId)> {
        let signature = ecdsa::Signature::from_scalars(
            *FieldBytes::from_slice(&self.r),
            *FieldBytes::from_slice(&self.s),
        )
        .map_err(|e| Error::Consistency(format!("invalid signature: {}", e)))?;
        let recovery_id = ecdsa::RecoveryId::from_byte(self.recovery_id).ok_or_else(|| {
            Error::Consistency(format!("invalid recovery id {}", self.recovery_id))
        })?;
        Ok((signature, recovery_id))
    }

    /// Convert to DER format
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let (signature, _) = self.to_k256()?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// `0x` || r || s || v with `v = 27 + recovery id`
    pub fn to_rsv_hex(&self) -> String {
        format!(
            "0x{}{}{:x}",
            hex::encode(self.r),
            hex::encode(self.s),
            27 + self.recovery_id
        )
    }
}

/// Hash algorithm applied to the message before signing. The identifier is
/// sent to the signer nodes so they can re-derive the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Keccak256,
    Sha256,
}

impl HashAlgorithm {
    /// Digest a message
    pub fn digest(&self, message: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        match self {
            HashAlgorithm::Keccak256 => out.copy_from_slice(&Keccak256::digest(message)),
            HashAlgorithm::Sha256 => out.copy_from_slice(&Sha256::digest(message)),
        }
        out
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Keccak256 => "keccak256",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keccak256" => Ok(HashAlgorithm::Keccak256),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(Error::Configuration(format!(
                "unsupported hash algorithm: {}",
                other
            ))),
        }
    }
}
