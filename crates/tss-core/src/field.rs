//! Scalar and point helpers over secp256k1
//!
//! Every encoding produced here is fixed width: scalars are always 32 bytes
//! (64 hex characters), points are always 32-byte big-endian coordinates.
//! Downstream parsers on the signer nodes assume these widths.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        point::AffineCoordinates,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        PrimeField,
    },
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar,
};

/// Width in bytes of a canonical scalar or coordinate encoding
pub const SCALAR_LEN: usize = 32;

/// Lift a small party or share index into the scalar field
pub fn scalar_from_index(index: u32) -> Scalar {
    Scalar::from(u64::from(index))
}

/// Modular inverse, rejecting zero
pub fn invert(value: &Scalar) -> Result<Scalar> {
    Option::<Scalar>::from(value.invert())
        .ok_or_else(|| Error::Consistency("attempted to invert zero scalar".into()))
}

/// Reduce a 32-byte big-endian integer (e.g. a message digest) mod n
pub fn reduce_bytes(bytes: &[u8; SCALAR_LEN]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&(*bytes).into())
}

/// `x(R) mod n`, the `r` of an ECDSA signature with nonce point `R`
pub fn x_coordinate_scalar(point: &ProjectivePoint) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&point.to_affine().x())
}

/// Fixed-width big-endian encoding of a scalar
pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; SCALAR_LEN] {
    let mut out = [0u8; SCALAR_LEN];
    out.copy_from_slice(scalar.to_bytes().as_slice());
    out
}

/// Decode a canonical (already reduced) scalar
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != SCALAR_LEN {
        return Err(Error::Deserialization(format!(
            "scalar must be {} bytes, got {}",
            SCALAR_LEN,
            bytes.len()
        )));
    }
    let repr = *FieldBytes::from_slice(bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr))
        .ok_or_else(|| Error::Deserialization("scalar is not below the group order".into()))
}

/// 64-character lowercase hex
pub fn scalar_to_hex(scalar: &Scalar) -> String {
    hex::encode(scalar_to_bytes(scalar))
}

/// Parse hex, tolerating a `0x` prefix and missing leading zeros
pub fn scalar_from_hex(value: &str) -> Result<Scalar> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() || digits.len() > SCALAR_LEN * 2 {
        return Err(Error::Deserialization(format!(
            "scalar hex must be 1..={} digits, got {}",
            SCALAR_LEN * 2,
            digits.len()
        )));
    }
    let padded = format!("{:0>width$}", digits, width = SCALAR_LEN * 2);
    let bytes = hex::decode(padded).map_err(|e| Error::Deserialization(e.to_string()))?;
    scalar_from_bytes(&bytes)
}

/// Base64 of the fixed-width 32-byte encoding
pub fn scalar_to_base64(scalar: &Scalar) -> String {
    STANDARD.encode(scalar_to_bytes(scalar))
}

/// Affine coordinates of a point; fails on the identity
pub fn point_coordinates(point: &ProjectivePoint) -> Result<([u8; SCALAR_LEN], [u8; SCALAR_LEN])> {
    let encoded = point.to_affine().to_encoded_point(false);
    match (encoded.x(), encoded.y()) {
        (Some(x), Some(y)) => {
            let mut x_out = [0u8; SCALAR_LEN];
            let mut y_out = [0u8; SCALAR_LEN];
            x_out.copy_from_slice(x.as_slice());
            y_out.copy_from_slice(y.as_slice());
            Ok((x_out, y_out))
        }
        _ => Err(Error::Consistency("point at infinity has no coordinates".into())),
    }
}

/// Rebuild a point from affine coordinates, checking it lies on the curve
pub fn point_from_coordinates(x: &[u8; SCALAR_LEN], y: &[u8; SCALAR_LEN]) -> Result<ProjectivePoint> {
    let encoded = EncodedPoint::from_affine_coordinates(
        FieldBytes::from_slice(x),
        FieldBytes::from_slice(y),
        false,
    );
    point_from_encoded(&encoded)
}

/// Decode a SEC1 point (compressed or uncompressed)
pub fn point_from_sec1(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded =
        EncodedPoint::from_bytes(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
    point_from_encoded(&encoded)
}

/// Compressed SEC1 encoding (33 bytes)
pub fn point_to_sec1(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

fn point_from_encoded(encoded: &EncodedPoint) -> Result<ProjectivePoint> {
    let affine_opt = AffinePoint::from_encoded_point(encoded);
    let affine: AffinePoint = Option::<AffinePoint>::from(affine_opt)
        .ok_or_else(|| Error::Deserialization("point is not on secp256k1".into()))?;
    Ok(ProjectivePoint::from(affine))
}
