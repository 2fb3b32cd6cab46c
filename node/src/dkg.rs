use crate::commit_reveal::{
    drive_exchange, CommitRevealExchange, ExchangeLabels, ExchangeRole, ExchangeState,
};
use crate::errors::{ChannelError, KeyError};
use crate::network::Messenger;
use crate::primitives::{Label, MessageKind};
use crate::schnorr::{KeyPair, SchnorrSignature};
use k256::ProjectivePoint;
use zchannel_primitives::PartyIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkgState {
    Start,
    WaitPubkey,
    WaitPubkeyCommit,
    Ready,
}

impl<T> From<&ExchangeState<T>> for DkgState {
    fn from(state: &ExchangeState<T>) -> Self {
        match state {
            ExchangeState::Start => DkgState::Start,
            ExchangeState::WaitValue => DkgState::WaitPubkey,
            ExchangeState::WaitCommitment | ExchangeState::WaitOpening(_) => {
                DkgState::WaitPubkeyCommit
            }
            ExchangeState::Done(_) => DkgState::Ready,
        }
    }
}

/// A 2-of-2 key: this party's share plus the sum of both public shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedKey {
    pub local: KeyPair,
    pub shared_public: ProjectivePoint,
}

impl SharedKey {
    /// Public-only view of the joint key.
    pub fn shared(&self) -> KeyPair {
        KeyPair::from_public(self.shared_public)
    }

    pub fn verify(&self, msg: &[u8], signature: &SchnorrSignature) -> bool {
        self.shared().verify(msg, signature)
    }
}

/// Generates a shared key with the peer. The public shares go through a
/// commit/reveal exchange so neither side can pick its share after seeing the
/// other's, which would let it cancel the honest share out.
pub struct DistributedKeyGen {
    labels: ExchangeLabels,
    local: KeyPair,
    exchange: CommitRevealExchange<ProjectivePoint>,
}

impl DistributedKeyGen {
    pub fn new(tag: &str, party: PartyIndex) -> Result<Self, KeyError> {
        let local = KeyPair::generate();
        let labels = ExchangeLabels {
            commitment: Label::new(MessageKind::Commitment, tag),
            value: Label::new(MessageKind::PublicKeyShare, tag),
        };
        let exchange = CommitRevealExchange::new(
            ExchangeRole::for_party(party),
            local.require_public()?,
            &labels.value,
        );
        Ok(Self {
            labels,
            local,
            exchange,
        })
    }

    pub fn state(&self) -> DkgState {
        self.exchange.state().into()
    }

    pub async fn run(&mut self, messenger: &Messenger) -> Result<SharedKey, ChannelError> {
        tracing::debug!(tag = %self.labels.value.tag, "starting key generation");
        let peer_public = drive_exchange(&mut self.exchange, messenger, &self.labels).await?;
        let shared_public = self.local.require_public()? + peer_public;
        tracing::debug!(tag = %self.labels.value.tag, "key generation done");
        Ok(SharedKey {
            local: self.local,
            shared_public,
        })
    }
}
