//! Deterministic derivation of per-coin randomness from the jointly agreed
//! channel seed. Both parties hold the same seed, so both derive the same
//! values without further communication.
use crate::errors::DerivationError;
use lru::LruCache;
use std::num::NonZeroUsize;
use zchannel_primitives::Uint256;

pub mod labels {
    pub const ASK: u8 = 0;
    pub const R: u8 = 1;
    pub const RHO: u8 = 2;
    pub const FUND: u8 = 3;
    pub const SHARE: u8 = 4;
    pub const CLOSE_R: u8 = 8;
    pub const CLOSE_RHO: u8 = 9;
    pub const REDEEM_R: u8 = 10;
    pub const REDEEM_RHO: u8 = 11;
    pub const REVOKE_R: u8 = 12;
    pub const REVOKE_RHO: u8 = 13;
}

/// Indices are packed into the top two bits of the label byte.
pub const MAX_INDEX: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivationTag {
    pub primary: u8,
    pub secondary: u8,
    pub sequence: u64,
    pub index: u8,
    pub sequence_mode: bool,
}

impl DerivationTag {
    /// A tag keyed by a secondary label, e.g. `(R, FUND)`.
    pub fn labelled(primary: u8, secondary: u8, index: u8) -> Self {
        Self {
            primary,
            secondary,
            sequence: 0,
            index,
            sequence_mode: false,
        }
    }

    /// A tag keyed by a balance sequence number, e.g. `(CLOSE_R, seq)`.
    pub fn sequenced(primary: u8, sequence: u64, index: u8) -> Self {
        Self {
            primary,
            secondary: 0,
            sequence,
            index,
            sequence_mode: true,
        }
    }

    fn packed_label(&self) -> Result<u8, DerivationError> {
        if self.index >= MAX_INDEX {
            return Err(DerivationError::IndexOutOfRange(self.index));
        }
        Ok((self.primary & 0x3f) | (self.index << 6))
    }
}

/// Closing coins are indexed by who owns the note and which of its two
/// outputs is meant: output 0 is the owner's time-locked output, output 1
/// pays the counterparty immediately.
pub fn closing_index(owner: u8, output: u8) -> u8 {
    (owner & 1) | ((output & 1) << 1)
}

pub struct DerivationEngine {
    seed: Uint256,
    cache: Option<LruCache<DerivationTag, Uint256>>,
}

impl DerivationEngine {
    /// A capacity of zero disables caching.
    pub fn new(seed: Uint256, cache_capacity: usize) -> Self {
        Self {
            seed,
            cache: NonZeroUsize::new(cache_capacity).map(LruCache::new),
        }
    }

    pub fn derive(&mut self, tag: DerivationTag) -> Result<Uint256, DerivationError> {
        if let Some(value) = self.cache.as_mut().and_then(|cache| cache.get(&tag)) {
            return Ok(*value);
        }
        let value = self.compute(&tag)?;
        if let Some(cache) = self.cache.as_mut() {
            cache.put(tag, value);
        }
        Ok(value)
    }

    fn compute(&self, tag: &DerivationTag) -> Result<Uint256, DerivationError> {
        let packed = [tag.packed_label()?];
        Ok(if tag.sequence_mode {
            Uint256::digest(&[&self.seed[..], &packed, &tag.sequence.to_le_bytes()])
        } else {
            Uint256::digest(&[&self.seed[..], &packed, &[tag.secondary]])
        })
    }

    /// The spending key shared by every coin of the channel.
    pub fn ask(&self) -> Uint256 {
        Uint256::digest(&[&self.seed[..], &[labels::ASK]])
    }

    pub fn apk(&self) -> Uint256 {
        Uint256::digest(&[&self.ask()[..], &[labels::ASK]])
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.len())
    }
}
