use crate::curve::{
    bytes_to_point, bytes_to_scalar, challenge_scalar, point_mul, point_to_bytes, random_scalar,
    scalar_to_bytes, x_coordinate_minimal,
};
use crate::errors::{DecodeError, KeyError, ProtocolError};
use k256::{ProjectivePoint, Scalar};
use std::ops::Add;
use zchannel_primitives::{Commitment, Uint256};

/// A Schnorr key pair in which either half may be absent. A peer's key is held
/// as public-only; a locally generated one has both halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyPair {
    secret: Option<Scalar>,
    public: Option<ProjectivePoint>,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret(random_scalar())
    }

    pub fn from_secret(secret: Scalar) -> Self {
        Self {
            public: Some(point_mul(&secret)),
            secret: Some(secret),
        }
    }

    pub fn from_public(public: ProjectivePoint) -> Self {
        Self {
            secret: None,
            public: Some(public),
        }
    }

    pub fn secret(&self) -> Option<&Scalar> {
        self.secret.as_ref()
    }

    /// The public point, computed from the secret when only that is known.
    pub fn public(&self) -> Option<ProjectivePoint> {
        self.public.or_else(|| self.secret.as_ref().map(point_mul))
    }

    pub fn require_public(&self) -> Result<ProjectivePoint, KeyError> {
        self.public().ok_or(KeyError::MissingPublic)
    }

    /// False only when both halves are present and disagree.
    pub fn is_consistent(&self) -> bool {
        match (&self.secret, &self.public) {
            (Some(secret), Some(public)) => point_mul(secret) == *public,
            _ => true,
        }
    }

    /// Single-party signature with a fresh nonce.
    pub fn sign(&self, msg: &[u8]) -> Result<SchnorrSignature, KeyError> {
        let nonce = random_scalar();
        self.sign_share(msg, &nonce, &point_mul(&nonce))
    }

    /// Signature share for a jointly held key: `nonce_secret` is this party's
    /// nonce and `shared_nonce` the sum of both parties' nonce points. Shares
    /// from both parties over the same `shared_nonce` combine into a signature
    /// under the sum of their public keys.
    pub fn sign_share(
        &self,
        msg: &[u8],
        nonce_secret: &Scalar,
        shared_nonce: &ProjectivePoint,
    ) -> Result<SchnorrSignature, KeyError> {
        let secret = self.secret.ok_or(KeyError::MissingSecret)?;
        let e = challenge(shared_nonce, msg);
        let s = nonce_secret - &(secret * challenge_scalar(&e));
        Ok(SchnorrSignature { e, s })
    }

    pub fn verify(&self, msg: &[u8], signature: &SchnorrSignature) -> bool {
        let Some(public) = self.public() else {
            return false;
        };
        let recovered = point_mul(&signature.s) + public * challenge_scalar(&signature.e);
        challenge(&recovered, msg) == signature.e
    }

    /// Hex of the uncompressed public key, or the empty string.
    pub fn public_hex(&self) -> String {
        self.public()
            .map(|p| hex::encode(point_to_bytes(&p)))
            .unwrap_or_default()
    }

    pub fn from_public_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(s)?;
        Ok(match bytes_to_point(&bytes)? {
            Some(public) => Self::from_public(public),
            None => Self::default(),
        })
    }

    /// Commitment to the public key, as used for coin ownership.
    pub fn commitment(&self) -> Result<Commitment, KeyError> {
        let public = self.require_public()?;
        Ok(Commitment::digest(&[&point_to_bytes(&public)]))
    }
}

impl Add for &KeyPair {
    type Output = KeyPair;

    fn add(self, rhs: &KeyPair) -> KeyPair {
        let secret = match (self.secret, rhs.secret) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        let public = match (self.public(), rhs.public()) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        };
        KeyPair { secret, public }
    }
}

impl Add for KeyPair {
    type Output = KeyPair;

    fn add(self, rhs: KeyPair) -> KeyPair {
        &self + &rhs
    }
}

/// `e = SHA256(xmin(R) || msg)`.
fn challenge(nonce: &ProjectivePoint, msg: &[u8]) -> Uint256 {
    Uint256::digest(&[&x_coordinate_minimal(nonce), msg])
}

/// `(e, s)` with the raw challenge hash kept as bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchnorrSignature {
    pub e: Uint256,
    pub s: Scalar,
}

impl SchnorrSignature {
    pub const ENCODED_LEN: usize = 64;

    /// Sums two shares computed over the same challenge.
    pub fn combine(&self, other: &SchnorrSignature) -> Result<SchnorrSignature, ProtocolError> {
        if self.e != other.e {
            return Err(ProtocolError::ChallengeMismatch);
        }
        Ok(SchnorrSignature {
            e: self.e,
            s: self.s + other.s,
        })
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.e[..]);
        out[32..].copy_from_slice(&scalar_to_bytes(&self.s));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(DecodeError::Length {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        let mut e = [0u8; 32];
        e.copy_from_slice(&bytes[..32]);
        Ok(Self {
            e: e.into(),
            s: bytes_to_scalar(&bytes[32..])?,
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        Self::from_bytes(&hex::decode(s)?)
    }
}
