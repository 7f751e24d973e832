//! Dealer-nonce signing engine
//!
//! The client samples the nonce `k` itself and hands `R = k·G` and `k⁻¹` to
//! every node with the precompute request. Each party then contributes
//! `k⁻¹·r·xᵢ` for its additive share `xᵢ` and the client adds `k⁻¹·m`.
//!
//! This is NOT a secure MPC protocol: any node that learns `k` together with
//! a signature can solve for the key. It exists so the ceremony, the
//! transport and the node service can be exercised end to end.

use crate::coefficients::lagrange_coefficient;
use crate::field::{
    invert, point_from_sec1, point_to_sec1, reduce_bytes, scalar_from_hex, scalar_to_hex,
    x_coordinate_scalar,
};
use crate::mpc::{async_trait, EngineInput, EngineSession, SigningEngine};
use crate::session::Session;
use crate::types::Signature;
use crate::{Error, Result};
use k256::{NonZeroScalar, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use zeroize::Zeroize;

/// Engine material shipped to every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealerPayload {
    /// Compressed SEC1 hex of `R`
    pub nonce_point: String,
    /// Hex of `k⁻¹`
    pub nonce_inverse: String,
}

impl DealerPayload {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::Deserialization(e.to_string()))
    }

    pub fn nonce_point(&self) -> Result<ProjectivePoint> {
        let bytes =
            hex::decode(&self.nonce_point).map_err(|e| Error::Deserialization(e.to_string()))?;
        point_from_sec1(&bytes)
    }

    pub fn nonce_inverse(&self) -> Result<Scalar> {
        scalar_from_hex(&self.nonce_inverse)
    }
}

/// Fragment of one party: `k⁻¹·r·xᵢ`
pub fn signature_fragment(
    nonce_inverse: &Scalar,
    nonce_point: &ProjectivePoint,
    additive_share: &Scalar,
) -> Scalar {
    *nonce_inverse * x_coordinate_scalar(nonce_point) * additive_share
}

/// Client-side engine with a dealer-chosen nonce
#[derive(Debug, Default)]
pub struct DealerEngine {
    loaded: AtomicBool,
}

impl DealerEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SigningEngine for DealerEngine {
    async fn load(&self) -> Result<()> {
        self.loaded.store(true, Ordering::SeqCst);
        debug!("Dealer engine loaded");
        Ok(())
    }

    fn begin(&self, session: &Session, input: EngineInput) -> Result<Box<dyn EngineSession>> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(Error::Engine("engine used before load".into()));
        }

        let weight = lagrange_coefficient(&input.party_ids, input.party_id, 0)
            .map_err(|e| Error::Engine(e.to_string()))?;
        let nonce = *NonZeroScalar::random(&mut OsRng);
        let nonce_inverse = invert(&nonce)?;

        debug!(
            scope = session.socket_scope(),
            party_id = input.party_id,
            "Dealer engine session started"
        );

        Ok(Box::new(DealerSession {
            nonce_point: ProjectivePoint::GENERATOR * nonce,
            nonce_inverse,
            additive_share: weight * input.share,
        }))
    }
}

struct DealerSession {
    nonce_point: ProjectivePoint,
    nonce_inverse: Scalar,
    additive_share: Scalar,
}

impl EngineSession for DealerSession {
    fn precompute_payload(&self) -> Result<String> {
        DealerPayload {
            nonce_point: hex::encode(point_to_sec1(&self.nonce_point)),
            nonce_inverse: scalar_to_hex(&self.nonce_inverse),
        }
        .encode()
    }

    fn combine(&self, digest: &[u8; 32], fragments: &[Scalar]) -> Result<Signature> {
        let local = signature_fragment(&self.nonce_inverse, &self.nonce_point, &self.additive_share)
            + self.nonce_inverse * reduce_bytes(digest);
        let s = fragments.iter().fold(local, |acc, fragment| acc + fragment);
        Signature::from_nonce_point(&self.nonce_point, s)
    }
}

impl Drop for DealerSession {
    fn drop(&mut self) {
        self.nonce_inverse.zeroize();
        self.additive_share.zeroize();
    }
}
