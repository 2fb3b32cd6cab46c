use crate::party::PartyIndex;
use core::fmt;
use core::ops::Index;

/// Balances of both parties at one point of the channel history.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ValuePair([u64; 2]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("balance pair must be 16 bytes, got {0}")]
pub struct InvalidValuePairLength(pub usize);

impl ValuePair {
    pub const ENCODED_LEN: usize = 16;

    pub fn new(first: u64, second: u64) -> Self {
        Self([first, second])
    }

    /// Sum of both balances, `None` on overflow.
    pub fn total(&self) -> Option<u64> {
        self.0[0].checked_add(self.0[1])
    }

    /// Whether `next` redistributes exactly the same total.
    pub fn conserves(&self, next: &ValuePair) -> bool {
        matches!((self.total(), next.total()), (Some(a), Some(b)) if a == b)
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.0[0].to_le_bytes());
        bytes[8..].copy_from_slice(&self.0[1].to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidValuePairLength> {
        let bytes: &[u8; 16] = bytes
            .try_into()
            .map_err(|_| InvalidValuePairLength(bytes.len()))?;
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[..8]);
        second.copy_from_slice(&bytes[8..]);
        Ok(Self([u64::from_le_bytes(first), u64::from_le_bytes(second)]))
    }
}

impl Index<PartyIndex> for ValuePair {
    type Output = u64;

    fn index(&self, index: PartyIndex) -> &u64 {
        &self.0[index.as_usize()]
    }
}

impl fmt::Display for ValuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0[0], self.0[1])
    }
}
