//! Client share denormalisation

use crate::field::{invert, scalar_to_base64};
use k256::{ProjectivePoint, Scalar};
use zeroize::Zeroize;

/// `coefficient · raw_share mod n`
pub fn denormalize(raw_share: &Scalar, coefficient: &Scalar) -> Scalar {
    *coefficient * raw_share
}

/// Inverse of [`denormalize`]
pub fn renormalize(denormalized: &Scalar, coefficient: &Scalar) -> crate::Result<Scalar> {
    Ok(invert(coefficient)? * denormalized)
}

/// The client's share for one ceremony. Never serialised, never sent;
/// only the denormalised value is handed to the local signing engine.
pub struct ShareMaterial {
    raw_share: Scalar,
    share_index: u32,
    denormalized: Scalar,
}

impl ShareMaterial {
    pub fn new(raw_share: Scalar, share_index: u32, coefficient: &Scalar) -> Self {
        let denormalized = denormalize(&raw_share, coefficient);
        Self {
            raw_share,
            share_index,
            denormalized,
        }
    }

    pub fn share_index(&self) -> u32 {
        self.share_index
    }

    pub fn denormalized(&self) -> &Scalar {
        &self.denormalized
    }

    /// Public point of the raw share, `share·G`
    pub fn public_point(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * self.raw_share
    }

    /// Fixed-width base64 of the denormalised share, the form DKLS engines load
    pub fn denormalized_base64(&self) -> String {
        scalar_to_base64(&self.denormalized)
    }
}

impl Drop for ShareMaterial {
    fn drop(&mut self) {
        self.raw_share.zeroize();
        self.denormalized.zeroize();
    }
}

impl std::fmt::Debug for ShareMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareMaterial")
            .field("share_index", &self.share_index)
            .finish_non_exhaustive()
    }
}
