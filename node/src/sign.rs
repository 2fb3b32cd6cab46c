use crate::commit_reveal::{drive_exchange, CommitRevealExchange, ExchangeLabels, ExchangeRole};
use crate::dkg::SharedKey;
use crate::errors::{ChannelError, KeyError, ProtocolError};
use crate::metrics;
use crate::network::Messenger;
use crate::primitives::{Label, MessageKind};
use crate::schnorr::{KeyPair, SchnorrSignature};
use k256::ProjectivePoint;
use std::time::Instant;
use zchannel_primitives::{NoteDigest, PartyIndex};

/// Who ends up with the combined signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMode {
    /// Receive the peer's share and combine.
    ForMe,
    /// Send our share only.
    ForOther,
    /// Both parties send their share and both combine.
    ForBoth,
}

impl SigningMode {
    fn sends_share(self) -> bool {
        matches!(self, SigningMode::ForOther | SigningMode::ForBoth)
    }

    fn receives_share(self) -> bool {
        matches!(self, SigningMode::ForMe | SigningMode::ForBoth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Ready,
    WaitAux,
    WaitAuxCommit,
    WaitSigShare,
}

/// One run of the 2-party Schnorr signing protocol under a shared key.
/// `sequence` numbers the run within the session; both parties must use the
/// same number for the same message.
pub struct DistributedSign<'a> {
    key: &'a SharedKey,
    party: PartyIndex,
    sequence: u64,
    mode: SigningMode,
    state: SigningState,
}

impl<'a> DistributedSign<'a> {
    pub fn new(key: &'a SharedKey, party: PartyIndex, sequence: u64, mode: SigningMode) -> Self {
        Self {
            key,
            party,
            sequence,
            mode,
            state: SigningState::Ready,
        }
    }

    pub fn state(&self) -> SigningState {
        self.state
    }

    pub async fn run(
        &mut self,
        messenger: &Messenger,
        digest: &NoteDigest,
    ) -> Result<Option<SchnorrSignature>, ChannelError> {
        let start = Instant::now();
        let result = self.run_inner(messenger, digest).await;
        if result.is_ok() {
            self.state = SigningState::Ready;
            metrics::ZCHANNEL_NUM_SIGNATURES_GENERATED.inc();
            metrics::ZCHANNEL_SIGNATURE_TIME_MS
                .set(i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX));
        }
        result
    }

    async fn run_inner(
        &mut self,
        messenger: &Messenger,
        digest: &NoteDigest,
    ) -> Result<Option<SchnorrSignature>, ChannelError> {
        let nonce = KeyPair::generate();
        let labels = ExchangeLabels {
            commitment: Label::new(MessageKind::AuxCommitment, self.sequence),
            value: Label::new(MessageKind::AuxPublicKey, self.sequence),
        };
        let role = ExchangeRole::for_party(self.party);
        let mut exchange = CommitRevealExchange::new(role, nonce.require_public()?, &labels.value);
        self.state = match role {
            ExchangeRole::SendCommit => SigningState::WaitAux,
            ExchangeRole::SendValue => SigningState::WaitAuxCommit,
        };
        let peer_nonce: ProjectivePoint = drive_exchange(&mut exchange, messenger, &labels).await?;
        let shared_nonce = nonce.require_public()? + peer_nonce;

        let secret = nonce.secret().ok_or(KeyError::MissingSecret)?;
        let own_share = self
            .key
            .local
            .sign_share(&digest[..], secret, &shared_nonce)?;
        let share_label = Label::new(MessageKind::SignatureShare, self.sequence);
        if self.mode.sends_share() {
            messenger.send(&share_label, own_share.to_hex())?;
        }
        if !self.mode.receives_share() {
            return Ok(None);
        }

        self.state = SigningState::WaitSigShare;
        let payload = messenger.wait_for(&share_label).await?;
        let peer_share = SchnorrSignature::from_hex(&payload)
            .map_err(|err| ChannelError::malformed(&share_label, err))?;
        let signature = own_share.combine(&peer_share)?;
        if !self.key.verify(&digest[..], &signature) {
            return Err(ProtocolError::InvalidSignature {
                context: format!("combined signature {}", self.sequence),
            }
            .into());
        }
        Ok(Some(signature))
    }
}
