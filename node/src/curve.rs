//! Scalar and point helpers over secp256k1, together with their canonical byte
//! encodings. All group parameters come from `k256` as constants.
use crate::errors::DecodeError;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::point::AffineCoordinates;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256};
use rand::rngs::OsRng;
use zchannel_primitives::Uint256;

/// Length of an uncompressed SEC1 point.
pub const POINT_ENCODED_LEN: usize = 65;
pub const SCALAR_ENCODED_LEN: usize = 32;

pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

/// `scalar * G`.
pub fn point_mul(scalar: &Scalar) -> ProjectivePoint {
    ProjectivePoint::GENERATOR * scalar
}

/// Uncompressed encoding; the identity encodes as the empty byte string.
pub fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
    if *point == ProjectivePoint::IDENTITY {
        return Vec::new();
    }
    point
        .to_affine()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec()
}

/// Inverse of [`point_to_bytes`]. Empty input decodes to `None`.
pub fn bytes_to_point(bytes: &[u8]) -> Result<Option<ProjectivePoint>, DecodeError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() != POINT_ENCODED_LEN {
        return Err(DecodeError::Length {
            expected: POINT_ENCODED_LEN,
            actual: bytes.len(),
        });
    }
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| DecodeError::InvalidPoint)?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or(DecodeError::InvalidPoint)?;
    Ok(Some(affine.into()))
}

/// 32-byte big-endian encoding.
pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&scalar.to_bytes());
    out
}

/// Accepts canonical encodings only, i.e. values below the group order.
pub fn bytes_to_scalar(bytes: &[u8]) -> Result<Scalar, DecodeError> {
    if bytes.len() != SCALAR_ENCODED_LEN {
        return Err(DecodeError::Length {
            expected: SCALAR_ENCODED_LEN,
            actual: bytes.len(),
        });
    }
    Scalar::from_repr(*FieldBytes::from_slice(bytes))
        .into_option()
        .ok_or(DecodeError::InvalidScalar)
}

/// Big-endian x coordinate with leading zero bytes removed. This is the
/// representation that goes into the signature challenge hash.
pub fn x_coordinate_minimal(point: &ProjectivePoint) -> Vec<u8> {
    let x = point.to_affine().x();
    strip_leading_zeros(&x).to_vec()
}

/// Interprets a 32-byte hash as a big-endian integer reduced modulo the group
/// order.
pub fn challenge_scalar(e: &Uint256) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(&e[..]))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_point_roundtrip() {
        let point = point_mul(&random_scalar());
        let bytes = point_to_bytes(&point);
        assert_eq!(bytes.len(), POINT_ENCODED_LEN);
        assert_eq!(bytes[0], 0x04);
        assert_eq!(bytes_to_point(&bytes).unwrap(), Some(point));
    }

    #[test]
    fn test_identity_encodes_empty() {
        assert!(point_to_bytes(&ProjectivePoint::IDENTITY).is_empty());
        assert_eq!(bytes_to_point(&[]).unwrap(), None);
    }

    #[test]
    fn test_invalid_points_rejected() {
        assert_matches!(
            bytes_to_point(&[4u8; 33]),
            Err(DecodeError::Length {
                expected: 65,
                actual: 33
            })
        );
        let mut bytes = point_to_bytes(&point_mul(&random_scalar()));
        bytes[64] ^= 1;
        assert_matches!(bytes_to_point(&bytes), Err(DecodeError::InvalidPoint));
    }

    #[test]
    fn test_scalar_roundtrip_and_canonical_check() {
        let scalar = random_scalar();
        assert_eq!(bytes_to_scalar(&scalar_to_bytes(&scalar)).unwrap(), scalar);
        assert_matches!(bytes_to_scalar(&[0xff; 32]), Err(DecodeError::InvalidScalar));
        assert_matches!(bytes_to_scalar(&[1; 31]), Err(DecodeError::Length { .. }));
    }

    #[test]
    fn test_strip_leading_zeros() {
        assert_eq!(strip_leading_zeros(&[0, 0, 1, 0]), &[1, 0]);
        assert_eq!(strip_leading_zeros(&[0, 0]), &[] as &[u8]);
        assert_eq!(strip_leading_zeros(&[7]), &[7]);
    }

    #[test]
    fn test_x_coordinate_of_generator() {
        let x = x_coordinate_minimal(&ProjectivePoint::GENERATOR);
        assert_eq!(
            hex::encode(x),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn test_challenge_scalar_reduces() {
        let one = Uint256::from({
            let mut bytes = [0u8; 32];
            bytes[31] = 1;
            bytes
        });
        assert_eq!(challenge_scalar(&one), Scalar::ONE);
        // n + 1 reduces to 1
        let n_plus_one: [u8; 32] = hex_literal::hex!(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364142"
        );
        assert_eq!(challenge_scalar(&Uint256::from(n_plus_one)), Scalar::ONE);
    }
}
