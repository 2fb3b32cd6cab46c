//! The channel state machine. A channel moves through
//! `Uninitialized -> Initialized -> WaitConfirmShare -> Established ->
//! WaitConfirmClose -> WaitConfirmRedeem -> Uninitialized`; every operation
//! checks its starting state before touching the session.
use crate::coin::{Coin, Note, SignedShareNote, CLOSE_TIMELOCK};
use crate::commit_reveal::{drive_exchange, CommitRevealExchange, ExchangeLabels, ExchangeRole};
use crate::derivation::{closing_index, labels, DerivationEngine, DerivationTag};
use crate::dkg::{DistributedKeyGen, SharedKey};
use crate::errors::{ChannelError, DecodeError, ProtocolError};
use crate::ledger::{Ledger, LedgerItem};
use crate::metrics;
use crate::network::{Messenger, Transport};
use crate::primitives::{Label, MessageKind};
use crate::schnorr::{KeyPair, SchnorrSignature};
use crate::sign::{DistributedSign, SigningMode};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use zchannel_primitives::{NoteDigest, PartyIndex, Uint256, ValuePair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Initialized,
    WaitConfirmShare,
    Established,
    WaitConfirmClose,
    WaitConfirmRedeem,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParams {
    /// Upper bound on every wait for a peer or ledger message.
    pub wait_timeout: Duration,
    /// Entries kept by the derivation cache; zero disables it.
    pub derivation_cache_capacity: usize,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            derivation_cache_capacity: 64,
        }
    }
}

/// One key pair per party for each role. The local entry holds a secret, the
/// peer's entry only the public key it sent.
#[derive(Debug, Clone, Copy)]
struct PartyKeys {
    fund: [KeyPair; 2],
    close: [KeyPair; 2],
    redeem: [KeyPair; 2],
    revoke: [KeyPair; 2],
}

fn by_party(party: PartyIndex, own: KeyPair, peer: KeyPair) -> [KeyPair; 2] {
    let mut keys = [own; 2];
    keys[party.other().as_usize()] = peer;
    keys
}

/// `SHA256("state" || seq || b0 || b1)`, all integers little-endian.
pub fn state_record_digest(sequence: u64, balances: &ValuePair) -> NoteDigest {
    NoteDigest::digest(&[
        b"state",
        &sequence.to_le_bytes(),
        &balances[PartyIndex::ZERO].to_le_bytes(),
        &balances[PartyIndex::ONE].to_le_bytes(),
    ])
}

/// Agrees on a 256-bit seed: each party contributes a half under
/// commit/reveal and the seed is their XOR.
pub(crate) async fn agree_seed(
    messenger: &Messenger,
    party: PartyIndex,
    own_half: Uint256,
) -> Result<Uint256, ChannelError> {
    let labels = ExchangeLabels {
        commitment: Label::new(MessageKind::Uint256, "seedcmt"),
        value: Label::new(MessageKind::Uint256, "seed"),
    };
    let mut exchange =
        CommitRevealExchange::new(ExchangeRole::for_party(party), own_half, &labels.value);
    let peer_half = drive_exchange(&mut exchange, messenger, &labels).await?;
    Ok(own_half ^ peer_half)
}

#[derive(Debug, Clone, Copy)]
struct HistoryLengths {
    balances: usize,
    close_notes: usize,
    redeem_notes: usize,
    revocations: usize,
    state_signatures: usize,
}

/// Everything that lives from `init` until the channel is closed or aborted.
struct Session {
    party: PartyIndex,
    messenger: Messenger,
    derivation: DerivationEngine,
    ask: Uint256,
    apk: Uint256,
    initial: ValuePair,
    keys: PartyKeys,
    share_key: SharedKey,
    close_key: SharedKey,
    signing_sequence: u64,
    balances: Vec<ValuePair>,
    share_note: Option<SignedShareNote>,
    /// The local party's close note for each balance sequence number.
    close_notes: Vec<Note>,
    redeem_notes: Vec<Note>,
    /// Revocations of the peer's superseded close notes.
    revocations: Vec<Note>,
    state_signatures: Vec<SchnorrSignature>,
}

impl Session {
    async fn negotiate(
        party: PartyIndex,
        messenger: Messenger,
        initial: ValuePair,
        cache_capacity: usize,
    ) -> Result<Self, ChannelError> {
        let own = [
            ("fund", KeyPair::generate()),
            ("close", KeyPair::generate()),
            ("redeem", KeyPair::generate()),
            ("revoke", KeyPair::generate()),
        ];
        for (name, key) in &own {
            messenger.send(&Label::new(MessageKind::PublicKey, name), key.public_hex())?;
        }
        let mut peer = [KeyPair::default(); 4];
        for (slot, (name, _)) in peer.iter_mut().zip(&own) {
            let label = Label::new(MessageKind::PublicKey, name);
            let payload = messenger.wait_for(&label).await?;
            let key = KeyPair::from_public_hex(&payload)
                .map_err(|err| ChannelError::malformed(&label, err))?;
            if key.public().is_none() {
                return Err(ChannelError::malformed(&label, DecodeError::InvalidPoint));
            }
            *slot = key;
        }
        let keys = PartyKeys {
            fund: by_party(party, own[0].1, peer[0]),
            close: by_party(party, own[1].1, peer[1]),
            redeem: by_party(party, own[2].1, peer[2]),
            revoke: by_party(party, own[3].1, peer[3]),
        };

        // Both sides must open with the same balances before any coin is
        // derived from them.
        let label = Label::new(MessageKind::Balance, "init");
        messenger.send(&label, hex::encode(initial.to_bytes()))?;
        let peer_initial = decode_balances(&label, &messenger.wait_for(&label).await?)?;
        if peer_initial != initial {
            return Err(ProtocolError::InitialBalanceMismatch {
                local: initial.to_string(),
                peer: peer_initial.to_string(),
            }
            .into());
        }

        let mut half = [0u8; 32];
        OsRng.fill_bytes(&mut half);
        let seed = agree_seed(&messenger, party, Uint256::from(half)).await?;

        let share_key = DistributedKeyGen::new("share", party)?
            .run(&messenger)
            .await?;
        let close_key = DistributedKeyGen::new("close", party)?
            .run(&messenger)
            .await?;

        let derivation = DerivationEngine::new(seed, cache_capacity);
        let ask = derivation.ask();
        let apk = derivation.apk();
        Ok(Self {
            party,
            messenger,
            derivation,
            ask,
            apk,
            initial,
            keys,
            share_key,
            close_key,
            signing_sequence: 0,
            balances: Vec::new(),
            share_note: None,
            close_notes: Vec::new(),
            redeem_notes: Vec::new(),
            revocations: Vec::new(),
            state_signatures: Vec::new(),
        })
    }

    fn balance_at(&self, sequence: u64) -> Result<ValuePair, ChannelError> {
        usize::try_from(sequence)
            .ok()
            .and_then(|index| self.balances.get(index))
            .copied()
            .ok_or_else(|| ChannelError::HistoryGap {
                expected: usize::try_from(sequence)
                    .unwrap_or(usize::MAX)
                    .saturating_add(1),
                actual: self.balances.len(),
            })
    }

    fn latest_balances(&self) -> Result<ValuePair, ChannelError> {
        self.balances.last().copied().ok_or(ChannelError::HistoryGap {
            expected: 1,
            actual: 0,
        })
    }

    fn fund_coin(&mut self, owner: PartyIndex) -> Result<Coin, ChannelError> {
        let index = owner.as_u8();
        Ok(Coin {
            value: self.initial[owner],
            apk: self.apk,
            r: self
                .derivation
                .derive(DerivationTag::labelled(labels::R, labels::FUND, index))?,
            rho: self
                .derivation
                .derive(DerivationTag::labelled(labels::RHO, labels::FUND, index))?,
            pkcm: self.keys.fund[owner.as_usize()].commitment()?,
            tlock: 0,
        })
    }

    fn share_coin(&mut self) -> Result<Coin, ChannelError> {
        let value = self
            .initial
            .total()
            .ok_or_else(|| ChannelError::InvalidBalance(format!("{} overflows", self.initial)))?;
        Ok(Coin {
            value,
            apk: self.apk,
            r: self
                .derivation
                .derive(DerivationTag::labelled(labels::R, labels::SHARE, 0))?,
            rho: self
                .derivation
                .derive(DerivationTag::labelled(labels::RHO, labels::SHARE, 0))?,
            pkcm: self.share_key.shared().commitment()?,
            tlock: 0,
        })
    }

    /// Output 0 is the owner's balance, locked under the joint close key for
    /// `CLOSE_TIMELOCK`; output 1 pays the counterparty right away.
    fn close_coin(
        &mut self,
        sequence: u64,
        owner: PartyIndex,
        output: u8,
    ) -> Result<Coin, ChannelError> {
        let balances = self.balance_at(sequence)?;
        let index = closing_index(owner.as_u8(), output);
        let (value, pkcm, tlock) = if output == 0 {
            (
                balances[owner],
                self.close_key.shared().commitment()?,
                CLOSE_TIMELOCK,
            )
        } else {
            let other = owner.other();
            (
                balances[other],
                self.keys.close[other.as_usize()].commitment()?,
                0,
            )
        };
        Ok(Coin {
            value,
            apk: self.apk,
            r: self
                .derivation
                .derive(DerivationTag::sequenced(labels::CLOSE_R, sequence, index))?,
            rho: self
                .derivation
                .derive(DerivationTag::sequenced(labels::CLOSE_RHO, sequence, index))?,
            pkcm,
            tlock,
        })
    }

    fn redeem_coin(&mut self, sequence: u64, owner: PartyIndex) -> Result<Coin, ChannelError> {
        let balances = self.balance_at(sequence)?;
        let index = owner.as_u8();
        Ok(Coin {
            value: balances[owner],
            apk: self.apk,
            r: self
                .derivation
                .derive(DerivationTag::sequenced(labels::REDEEM_R, sequence, index))?,
            rho: self
                .derivation
                .derive(DerivationTag::sequenced(labels::REDEEM_RHO, sequence, index))?,
            pkcm: self.keys.redeem[owner.as_usize()].commitment()?,
            tlock: 0,
        })
    }

    /// Pays the balance `recipient`'s counterparty held at `sequence` to
    /// `recipient`.
    fn revoke_coin(&mut self, sequence: u64, recipient: PartyIndex) -> Result<Coin, ChannelError> {
        let balances = self.balance_at(sequence)?;
        let index = recipient.as_u8();
        Ok(Coin {
            value: balances[recipient.other()],
            apk: self.apk,
            r: self
                .derivation
                .derive(DerivationTag::sequenced(labels::REVOKE_R, sequence, index))?,
            rho: self
                .derivation
                .derive(DerivationTag::sequenced(labels::REVOKE_RHO, sequence, index))?,
            pkcm: self.keys.revoke[recipient.as_usize()].commitment()?,
            tlock: 0,
        })
    }

    fn share_note(&mut self) -> Result<Note, ChannelError> {
        let fund0 = self.fund_coin(PartyIndex::ZERO)?;
        let fund1 = self.fund_coin(PartyIndex::ONE)?;
        let share = self.share_coin()?;
        Ok(Note::new(
            fund0.serial(&self.ask),
            fund1.serial(&self.ask),
            share.commit(),
            Uint256::ZERO,
        ))
    }

    fn close_note(&mut self, owner: PartyIndex, sequence: u64) -> Result<Note, ChannelError> {
        let share = self.share_coin()?;
        let own_output = self.close_coin(sequence, owner, 0)?;
        let other_output = self.close_coin(sequence, owner, 1)?;
        Ok(Note::new(
            share.serial(&self.ask),
            Uint256::ZERO,
            own_output.commit(),
            other_output.commit(),
        ))
    }

    fn redeem_note(&mut self, owner: PartyIndex, sequence: u64) -> Result<Note, ChannelError> {
        let locked = self.close_coin(sequence, owner, 0)?;
        let redeem = self.redeem_coin(sequence, owner)?;
        Ok(Note::single(locked.serial(&self.ask), redeem.commit()))
    }

    fn revocation_note(&mut self, owner: PartyIndex, sequence: u64) -> Result<Note, ChannelError> {
        let locked = self.close_coin(sequence, owner, 0)?;
        let revoke = self.revoke_coin(sequence, owner.other())?;
        Ok(Note::single(locked.serial(&self.ask), revoke.commit()))
    }

    async fn co_sign(
        &mut self,
        key: SharedKey,
        digest: NoteDigest,
        mode: SigningMode,
    ) -> Result<Option<SchnorrSignature>, ChannelError> {
        let sequence = self.signing_sequence;
        self.signing_sequence += 1;
        DistributedSign::new(&key, self.party, sequence, mode)
            .run(&self.messenger, &digest)
            .await
    }

    /// Signs one note per owner under `key`. The beneficiary named by
    /// `receiver` gets the signature; the local party's note is returned.
    async fn sign_per_owner(
        &mut self,
        key: SharedKey,
        notes: [Note; 2],
        receiver: impl Fn(PartyIndex) -> PartyIndex,
        context: &str,
    ) -> Result<Note, ChannelError> {
        let mut kept = None;
        for (owner, note) in PartyIndex::ALL.into_iter().zip(notes) {
            let mode = if receiver(owner) == self.party {
                SigningMode::ForMe
            } else {
                SigningMode::ForOther
            };
            if let Some(signature) = self.co_sign(key, note.digest(), mode).await? {
                kept = Some(note.with_signature(signature));
            }
        }
        kept.ok_or_else(|| {
            ProtocolError::InvalidSignature {
                context: context.to_string(),
            }
            .into()
        })
    }

    async fn sign_close_redeem_notes(&mut self, sequence: u64) -> Result<(), ChannelError> {
        if self.close_notes.len() as u64 != sequence {
            return Err(ChannelError::HistoryGap {
                expected: sequence as usize,
                actual: self.close_notes.len(),
            });
        }
        self.balance_at(sequence)?;

        let close_notes = [
            self.close_note(PartyIndex::ZERO, sequence)?,
            self.close_note(PartyIndex::ONE, sequence)?,
        ];
        let share_key = self.share_key;
        let close = self
            .sign_per_owner(share_key, close_notes, |owner| owner, "close note")
            .await?;

        let redeem_notes = [
            self.redeem_note(PartyIndex::ZERO, sequence)?,
            self.redeem_note(PartyIndex::ONE, sequence)?,
        ];
        let close_key = self.close_key;
        let redeem = self
            .sign_per_owner(close_key, redeem_notes, |owner| owner, "redeem note")
            .await?;

        self.close_notes.push(close);
        self.redeem_notes.push(redeem);
        tracing::debug!(sequence, "close and redeem notes signed");
        Ok(())
    }

    /// Each party hands over the means to punish it if it ever publishes the
    /// close note of `sequence`.
    async fn sign_revocations(&mut self, sequence: u64) -> Result<(), ChannelError> {
        let notes = [
            self.revocation_note(PartyIndex::ZERO, sequence)?,
            self.revocation_note(PartyIndex::ONE, sequence)?,
        ];
        let close_key = self.close_key;
        let revocation = self
            .sign_per_owner(close_key, notes, PartyIndex::other, "revocation")
            .await?;
        self.revocations.push(revocation);
        Ok(())
    }

    fn history_lengths(&self) -> HistoryLengths {
        HistoryLengths {
            balances: self.balances.len(),
            close_notes: self.close_notes.len(),
            redeem_notes: self.redeem_notes.len(),
            revocations: self.revocations.len(),
            state_signatures: self.state_signatures.len(),
        }
    }

    fn roll_back(&mut self, lengths: HistoryLengths) {
        self.balances.truncate(lengths.balances);
        self.close_notes.truncate(lengths.close_notes);
        self.redeem_notes.truncate(lengths.redeem_notes);
        self.revocations.truncate(lengths.revocations);
        self.state_signatures.truncate(lengths.state_signatures);
    }

    /// Records the initial balances and signs the notes for sequence 0.
    async fn open_history(&mut self) -> Result<(), ChannelError> {
        let lengths = self.history_lengths();
        self.balances.push(self.initial);
        let result = self.sign_close_redeem_notes(0).await;
        if result.is_err() {
            self.roll_back(lengths);
        }
        result
    }

    async fn run_update_round(&mut self, balances: ValuePair) -> Result<(), ChannelError> {
        let lengths = self.history_lengths();
        let result = self.update_round(balances).await;
        if let Err(err) = &result {
            tracing::warn!(%err, "update failed, rolling back");
            self.roll_back(lengths);
        }
        result
    }

    async fn update_round(&mut self, balances: ValuePair) -> Result<(), ChannelError> {
        let sequence = self.balances.len() as u64;
        self.balances.push(balances);

        let share_key = self.share_key;
        let signature = self
            .co_sign(
                share_key,
                state_record_digest(sequence, &balances),
                SigningMode::ForBoth,
            )
            .await?
            .ok_or_else(|| ProtocolError::InvalidSignature {
                context: format!("state record {}", sequence),
            })?;
        self.state_signatures.push(signature);

        self.sign_close_redeem_notes(sequence).await?;
        self.sign_revocations(sequence - 1).await
    }
}

/// One party's end of a payment channel.
pub struct ZChannel {
    party: PartyIndex,
    params: ChannelParams,
    ledger: Arc<dyn Ledger>,
    state: ChannelState,
    session: Option<Session>,
}

impl ZChannel {
    pub fn new(party: PartyIndex, params: ChannelParams, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            party,
            params,
            ledger,
            state: ChannelState::Uninitialized,
            session: None,
        }
    }

    pub fn party(&self) -> PartyIndex {
        self.party
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn balances(&self) -> &[ValuePair] {
        self.session
            .as_ref()
            .map(|s| s.balances.as_slice())
            .unwrap_or_default()
    }

    pub fn close_notes(&self) -> &[Note] {
        self.session
            .as_ref()
            .map(|s| s.close_notes.as_slice())
            .unwrap_or_default()
    }

    pub fn redeem_notes(&self) -> &[Note] {
        self.session
            .as_ref()
            .map(|s| s.redeem_notes.as_slice())
            .unwrap_or_default()
    }

    pub fn revocations(&self) -> &[Note] {
        self.session
            .as_ref()
            .map(|s| s.revocations.as_slice())
            .unwrap_or_default()
    }

    pub fn state_signatures(&self) -> &[SchnorrSignature] {
        self.session
            .as_ref()
            .map(|s| s.state_signatures.as_slice())
            .unwrap_or_default()
    }

    pub fn share_note(&self) -> Option<&SignedShareNote> {
        self.session.as_ref().and_then(|s| s.share_note.as_ref())
    }

    /// Public halves of the joint share and close keys.
    pub fn shared_keys(&self) -> Option<(KeyPair, KeyPair)> {
        self.session
            .as_ref()
            .map(|s| (s.share_key.shared(), s.close_key.shared()))
    }

    /// Recomputes both outputs of `owner`'s close note at `sequence`.
    pub fn close_outputs(
        &mut self,
        owner: PartyIndex,
        sequence: u64,
    ) -> Result<[Coin; 2], ChannelError> {
        let state = self.state;
        let session = self.session.as_mut().ok_or(ChannelError::InvalidState {
            operation: "compute close outputs",
            state,
        })?;
        Ok([
            session.close_coin(sequence, owner, 0)?,
            session.close_coin(sequence, owner, 1)?,
        ])
    }

    pub async fn init(
        &mut self,
        transport: Transport,
        balances: ValuePair,
    ) -> Result<(), ChannelError> {
        if self.state != ChannelState::Uninitialized || self.session.is_some() {
            return Err(ChannelError::InvalidState {
                operation: "init",
                state: self.state,
            });
        }
        if balances.total().is_none() {
            return Err(ChannelError::InvalidBalance(format!(
                "{} overflows",
                balances
            )));
        }
        let messenger = Messenger::start(transport, self.params.wait_timeout);
        let session = Session::negotiate(
            self.party,
            messenger,
            balances,
            self.params.derivation_cache_capacity,
        )
        .await?;
        self.session = Some(session);
        self.state = ChannelState::Initialized;
        tracing::info!(party = %self.party, %balances, "channel initialized");
        Ok(())
    }

    pub async fn establish(&mut self) -> Result<(), ChannelError> {
        let state = self.state;
        let party = self.party;
        let Some(session) = self
            .session
            .as_mut()
            .filter(|_| state == ChannelState::Initialized)
        else {
            return Err(ChannelError::InvalidState {
                operation: "establish",
                state,
            });
        };

        let note = session.share_note()?;
        let digest = note.digest();
        let own_signature = session.keys.fund[party.as_usize()].sign(&digest[..])?;
        let label = Label::new(MessageKind::Signature, "share");
        session.messenger.send(&label, own_signature.to_hex())?;
        let payload = session.messenger.wait_for(&label).await?;
        let peer_signature = SchnorrSignature::from_hex(&payload)
            .map_err(|err| ChannelError::malformed(&label, err))?;
        if !session.keys.fund[party.other().as_usize()].verify(&digest[..], &peer_signature) {
            return Err(ProtocolError::InvalidSignature {
                context: "share note funding signature".to_string(),
            }
            .into());
        }
        let mut signatures = [own_signature; 2];
        signatures[party.other().as_usize()] = peer_signature;
        let share_note = SignedShareNote { note, signatures };
        session.share_note = Some(share_note);
        session.open_history().await?;

        self.state = ChannelState::WaitConfirmShare;
        let fund_labels = PartyIndex::ALL
            .map(|owner| Label::new(MessageKind::Confirmation, format!("fund{}", owner)));
        let share_label = Label::new(MessageKind::Confirmation, "share");
        let commitment = session.fund_coin(party)?.commit();
        self.ledger
            .publish(
                &fund_labels[party.as_usize()],
                LedgerItem::FundCoin {
                    owner: party,
                    commitment,
                },
                &session.messenger,
            )
            .await?;
        if party == PartyIndex::ZERO {
            self.ledger
                .publish(
                    &share_label,
                    LedgerItem::ShareNote(share_note),
                    &session.messenger,
                )
                .await?;
        }
        for label in fund_labels.iter().chain([&share_label]) {
            session.messenger.wait_for(label).await?;
        }
        self.state = ChannelState::Established;
        tracing::info!(%party, "channel established");
        Ok(())
    }

    /// Proposes new balances to the peer and co-signs the new state.
    pub async fn update(&mut self, balances: ValuePair) -> Result<(), ChannelError> {
        let session = self.established_session("update")?;
        let latest = session.latest_balances()?;
        if !latest.conserves(&balances) {
            return Err(ChannelError::InvalidBalance(format!(
                "{} does not conserve the total of {}",
                balances, latest
            )));
        }
        let sequence = session.balances.len();
        session.messenger.send(
            &Label::new(MessageKind::Balance, sequence),
            hex::encode(balances.to_bytes()),
        )?;
        session.run_update_round(balances).await?;
        metrics::ZCHANNEL_NUM_UPDATES.inc();
        tracing::info!(sequence, %balances, "balances updated");
        Ok(())
    }

    /// Waits for the peer's next proposal and co-signs it.
    pub async fn accept_update(&mut self) -> Result<ValuePair, ChannelError> {
        let session = self.established_session("accept update")?;
        let latest = session.latest_balances()?;
        let sequence = session.balances.len();
        let label = Label::new(MessageKind::Balance, sequence);
        let payload = session.messenger.wait_for(&label).await?;
        let proposed = decode_balances(&label, &payload)?;
        if !latest.conserves(&proposed) {
            return Err(ProtocolError::BalanceNotConserved {
                previous: latest.to_string(),
                proposed: proposed.to_string(),
            }
            .into());
        }
        session.run_update_round(proposed).await?;
        metrics::ZCHANNEL_NUM_UPDATES.inc();
        tracing::info!(sequence, balances = %proposed, "balances updated by peer");
        Ok(proposed)
    }

    /// Closes on the latest balances. The active party publishes its close
    /// note and then the matching redeem note; the passive party waits for
    /// both confirmations.
    pub async fn close(&mut self, active: bool) -> Result<(), ChannelError> {
        let state = self.state;
        let Some(session) = self
            .session
            .as_mut()
            .filter(|_| state == ChannelState::Established)
        else {
            return Err(ChannelError::InvalidState {
                operation: "close",
                state,
            });
        };
        let close_label = Label::new(MessageKind::Confirmation, "close");
        let redeem_label = Label::new(MessageKind::Confirmation, "redeem");

        self.state = ChannelState::WaitConfirmClose;
        tracing::info!(active, "closing channel");
        if active {
            let (sequence, note) = latest_note(&session.close_notes)?;
            self.ledger
                .publish(
                    &close_label,
                    LedgerItem::CloseNote { sequence, note },
                    &session.messenger,
                )
                .await?;
        }
        session.messenger.wait_for(&close_label).await?;

        self.state = ChannelState::WaitConfirmRedeem;
        if active {
            let (sequence, note) = latest_note(&session.redeem_notes)?;
            self.ledger
                .publish(
                    &redeem_label,
                    LedgerItem::RedeemNote { sequence, note },
                    &session.messenger,
                )
                .await?;
        }
        session.messenger.wait_for(&redeem_label).await?;

        self.abort().await;
        tracing::info!("channel closed");
        Ok(())
    }

    /// Tells the peer the session is over and drops it.
    pub async fn abort(&mut self) {
        if let Some(session) = self.session.take() {
            session.messenger.shutdown().await;
        }
        self.state = ChannelState::Uninitialized;
    }

    fn established_session(&mut self, operation: &'static str) -> Result<&mut Session, ChannelError> {
        let state = self.state;
        self.session
            .as_mut()
            .filter(|_| state == ChannelState::Established)
            .ok_or(ChannelError::InvalidState { operation, state })
    }
}

/// Decodes a `bal:` payload, `b0_le || b1_le` in hex.
fn decode_balances(label: &Label, payload: &str) -> Result<ValuePair, ChannelError> {
    let bytes = hex::decode(payload).map_err(|err| ChannelError::malformed(label, err.into()))?;
    ValuePair::from_bytes(&bytes).map_err(|err| {
        ChannelError::malformed(
            label,
            DecodeError::Length {
                expected: ValuePair::ENCODED_LEN,
                actual: err.0,
            },
        )
    })
}

fn latest_note(notes: &[Note]) -> Result<(u64, Note), ChannelError> {
    let note = notes.last().copied().ok_or(ChannelError::HistoryGap {
        expected: 1,
        actual: 0,
    })?;
    Ok((notes.len() as u64 - 1, note))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::new_test_messengers;
    use crate::tests::{established_pair, test_params};
    use assert_matches::assert_matches;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_seed_is_xor_of_halves() {
        let (first, second) = new_test_messengers(TIMEOUT);
        let mut half0 = [0u8; 32];
        half0[31] = 0x01;
        let mut half1 = [0u8; 32];
        half1[31] = 0x02;
        let (seed0, seed1) = futures::future::join(
            agree_seed(&first, PartyIndex::ZERO, Uint256::from(half0)),
            agree_seed(&second, PartyIndex::ONE, Uint256::from(half1)),
        )
        .await;
        let mut expected = [0u8; 32];
        expected[31] = 0x03;
        assert_eq!(seed0.unwrap(), Uint256::from(expected));
        assert_eq!(seed1.unwrap(), Uint256::from(expected));
    }

    #[test]
    fn test_state_record_digest_layout() {
        let balances = ValuePair::new(80, 120);
        let mut preimage = b"state".to_vec();
        preimage.extend_from_slice(&1u64.to_le_bytes());
        preimage.extend_from_slice(&80u64.to_le_bytes());
        preimage.extend_from_slice(&120u64.to_le_bytes());
        assert_eq!(
            state_record_digest(1, &balances),
            NoteDigest::digest(&[&preimage])
        );
        assert_ne!(
            state_record_digest(2, &balances),
            state_record_digest(1, &balances)
        );
    }

    #[test]
    fn test_latest_note() {
        assert_matches!(
            latest_note(&[]),
            Err(ChannelError::HistoryGap {
                expected: 1,
                actual: 0
            })
        );
        let notes = [
            Note::single(Uint256::from_u64(1), Uint256::from_u64(2)),
            Note::single(Uint256::from_u64(3), Uint256::from_u64(4)),
        ];
        assert_eq!(latest_note(&notes).unwrap(), (1, notes[1]));
    }

    #[tokio::test]
    async fn test_note_signing_requires_contiguous_history() {
        let (mut first, _second, _ledger) =
            established_pair(test_params(TIMEOUT), ValuePair::new(5, 5)).await;
        let session = first.session.as_mut().unwrap();
        assert_matches!(
            session.sign_close_redeem_notes(5).await,
            Err(ChannelError::HistoryGap {
                expected: 5,
                actual: 1
            })
        );
        // Notes for sequence 1 need its balances first.
        assert_matches!(
            session.sign_close_redeem_notes(1).await,
            Err(ChannelError::HistoryGap {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(session.close_notes.len(), 1);
        assert_eq!(session.signing_sequence, 4);
    }

    #[tokio::test]
    async fn test_both_parties_derive_the_same_coins() {
        let (mut first, mut second, _ledger) =
            established_pair(test_params(TIMEOUT), ValuePair::new(30, 12)).await;
        for owner in PartyIndex::ALL {
            assert_eq!(
                first.close_outputs(owner, 0).unwrap(),
                second.close_outputs(owner, 0).unwrap()
            );
        }
        let (a, b) = (
            first.session.as_mut().unwrap(),
            second.session.as_mut().unwrap(),
        );
        assert_eq!(a.ask, b.ask);
        assert_eq!(a.share_note().unwrap(), b.share_note().unwrap());
        assert_eq!(
            a.revocation_note(PartyIndex::ONE, 0).unwrap(),
            b.revocation_note(PartyIndex::ONE, 0).unwrap()
        );
        assert_matches!(
            first.close_outputs(PartyIndex::ZERO, 3),
            Err(ChannelError::HistoryGap {
                expected: 4,
                actual: 1
            })
        );
    }

    #[tokio::test]
    async fn test_close_outputs_far_past_history() {
        let (mut first, _second, _ledger) =
            established_pair(test_params(TIMEOUT), ValuePair::new(5, 5)).await;
        assert_matches!(
            first.close_outputs(PartyIndex::ZERO, u64::MAX),
            Err(ChannelError::HistoryGap { actual: 1, .. })
        );
        assert_matches!(
            first.close_outputs(PartyIndex::ONE, 1),
            Err(ChannelError::HistoryGap {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(first.close_outputs(PartyIndex::ONE, 0).unwrap()[1].value, 5);
    }
}
