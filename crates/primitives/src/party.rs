use core::fmt;

/// Position of a party in a two-party channel. Only `0` and `1` exist.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct PartyIndex(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("party index must be 0 or 1, got {0}")]
pub struct InvalidPartyIndex(pub u8);

impl PartyIndex {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);
    pub const ALL: [Self; 2] = [Self::ZERO, Self::ONE];

    pub fn new(index: u8) -> Result<Self, InvalidPartyIndex> {
        match index {
            0 | 1 => Ok(Self(index)),
            other => Err(InvalidPartyIndex(other)),
        }
    }

    pub fn other(self) -> Self {
        Self(1 - self.0)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PartyIndex {
    type Error = InvalidPartyIndex;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartyIndex> for u8 {
    fn from(value: PartyIndex) -> Self {
        value.0
    }
}

impl fmt::Display for PartyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
