use crate::schnorr::SchnorrSignature;
use zchannel_primitives::{Commitment, NoteDigest, Uint256};

/// Time lock carried by the owner's output of a close note.
pub const CLOSE_TIMELOCK: u64 = 1000;

/// A shielded coin. Only its commitment and serial number ever leave the
/// parties; the fields are recomputed from the seed whenever needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coin {
    pub value: u64,
    pub apk: Uint256,
    pub r: Uint256,
    pub rho: Uint256,
    /// Commitment to the public key that must sign to spend this coin.
    pub pkcm: Commitment,
    pub tlock: u64,
}

impl Coin {
    /// `SHA256(apk || u256(value) || r || rho || pkcm || u256(tlock))`.
    pub fn commit(&self) -> Uint256 {
        Uint256::digest(&[
            &self.apk[..],
            &Uint256::from_u64(self.value)[..],
            &self.r[..],
            &self.rho[..],
            &self.pkcm[..],
            &Uint256::from_u64(self.tlock)[..],
        ])
    }

    pub fn serial(&self, ask: &Uint256) -> Uint256 {
        Uint256::digest(&[&ask[..], &self.rho[..]])
    }
}

/// A transaction spending up to two coins into up to two new ones. Unused
/// slots hold the zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub sn1: Uint256,
    pub sn2: Uint256,
    pub cm1: Uint256,
    pub cm2: Uint256,
    pub signature: Option<SchnorrSignature>,
}

impl Note {
    pub fn new(sn1: Uint256, sn2: Uint256, cm1: Uint256, cm2: Uint256) -> Self {
        Self {
            sn1,
            sn2,
            cm1,
            cm2,
            signature: None,
        }
    }

    /// Spends one coin into one coin.
    pub fn single(sn: Uint256, cm: Uint256) -> Self {
        Self::new(sn, Uint256::ZERO, cm, Uint256::ZERO)
    }

    /// The message that gets signed.
    pub fn digest(&self) -> NoteDigest {
        NoteDigest::digest(&[&self.sn1[..], &self.sn2[..], &self.cm1[..], &self.cm2[..]])
    }

    pub fn with_signature(mut self, signature: SchnorrSignature) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// The note merging both funding coins into the share coin. Each funding coin
/// is controlled by one party's own key, so it carries two signatures, indexed
/// by party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedShareNote {
    pub note: Note,
    pub signatures: [SchnorrSignature; 2],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schnorr::KeyPair;

    fn coin() -> Coin {
        Coin {
            value: 100,
            apk: Uint256::from_u64(1),
            r: Uint256::from_u64(2),
            rho: Uint256::from_u64(3),
            pkcm: Commitment::from_u64(4),
            tlock: CLOSE_TIMELOCK,
        }
    }

    #[test]
    fn test_commit_layout() {
        let c = coin();
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&c.apk[..]);
        preimage.extend_from_slice(&Uint256::from_u64(100)[..]);
        preimage.extend_from_slice(&c.r[..]);
        preimage.extend_from_slice(&c.rho[..]);
        preimage.extend_from_slice(&c.pkcm[..]);
        preimage.extend_from_slice(&Uint256::from_u64(1000)[..]);
        assert_eq!(c.commit(), Uint256::digest(&[&preimage]));
    }

    #[test]
    fn test_commit_binds_every_field() {
        let base = coin().commit();
        let variants = [
            Coin { value: 101, ..coin() },
            Coin { apk: Uint256::from_u64(9), ..coin() },
            Coin { r: Uint256::from_u64(9), ..coin() },
            Coin { rho: Uint256::from_u64(9), ..coin() },
            Coin { pkcm: Commitment::from_u64(9), ..coin() },
            Coin { tlock: 0, ..coin() },
        ];
        for variant in variants {
            assert_ne!(variant.commit(), base);
        }
    }

    #[test]
    fn test_serial_depends_on_rho_only() {
        let ask = Uint256::from_u64(77);
        let moved = Coin { value: 5, r: Uint256::from_u64(8), ..coin() };
        assert_eq!(coin().serial(&ask), moved.serial(&ask));
        let other = Coin { rho: Uint256::from_u64(8), ..coin() };
        assert_ne!(coin().serial(&ask), other.serial(&ask));
    }

    #[test]
    fn test_digest_ignores_signature() {
        let note = Note::single(Uint256::from_u64(1), Uint256::from_u64(2));
        let signed = note.with_signature(KeyPair::generate().sign(b"x").unwrap());
        assert_eq!(note.digest(), signed.digest());
        assert_eq!(note.sn2, Uint256::ZERO);
        assert_eq!(note.cm2, Uint256::ZERO);
        let swapped = Note::new(note.cm1, note.sn2, note.sn1, note.cm2);
        assert_ne!(swapped.digest(), note.digest());
    }
}
