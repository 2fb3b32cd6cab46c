use core::marker::PhantomData;
use core::ops::BitXor;
use core::str::FromStr;
use derive_more::{AsRef, Deref, Into};
use sha2::{Digest, Sha256};

/// A 256-bit value tagged with what it represents. The tag only exists at the
/// type level; on the wire it is the hex of the raw byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, AsRef, Into)]
pub struct Hash32<T> {
    #[deref]
    #[as_ref]
    #[into]
    bytes: [u8; 32],
    #[into(skip)]
    _marker: PhantomData<T>,
}

impl<T> From<[u8; 32]> for Hash32<T> {
    fn from(bytes: [u8; 32]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }
}

impl<T> Hash32<T> {
    pub const ZERO: Self = Self {
        bytes: [0u8; 32],
        _marker: PhantomData,
    };

    /// Converts the hash to a hexadecimal string representation.
    pub fn as_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Encodes `n` little-endian into the low 8 bytes, the rest being zero.
    pub fn from_u64(n: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        bytes.into()
    }

    /// SHA-256 over the concatenation of `parts`.
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let bytes: [u8; 32] = hasher.finalize().into();
        bytes.into()
    }
}

impl<T> BitXor for Hash32<T> {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        let mut bytes = self.bytes;
        for (byte, other) in bytes.iter_mut().zip(rhs.bytes.iter()) {
            *byte ^= other;
        }
        bytes.into()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseHashError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl<T> FromStr for Hash32<T> {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s)?;
        let bytes: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| ParseHashError::Length(decoded.len()))?;
        Ok(bytes.into())
    }
}

// Marker types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Value;
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Commit;
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Message;

/// Generic 256-bit value: seeds, nonces, serial numbers and coin commitments.
pub type Uint256 = Hash32<Value>;

/// Binding hash of a value that is revealed later (public keys, seed halves,
/// coin owner keys).
pub type Commitment = Hash32<Commit>;

/// Digest of a note; this is the message that gets signed.
pub type NoteDigest = Hash32<Message>;
