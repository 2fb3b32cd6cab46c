//! Two-party commit-then-reveal exchange. One side commits to its value first
//! and reveals only after seeing the other side's value; the other side reveals
//! right away but only after receiving that commitment, and checks the
//! eventual reveal against it. Neither side can choose its value as a function
//! of the other's.
use crate::curve::{bytes_to_point, point_to_bytes};
use crate::errors::{ChannelError, DecodeError, ProtocolError};
use crate::network::Messenger;
use crate::primitives::{parse_hash32, Label};
use k256::ProjectivePoint;
use subtle::ConstantTimeEq;
use zchannel_primitives::{Commitment, PartyIndex, Uint256};

/// A value that can go through a commit/reveal exchange.
pub trait ExchangeValue: Sized + Clone {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;

    fn commitment(&self) -> Commitment {
        Commitment::digest(&[&self.encode()])
    }
}

impl ExchangeValue for ProjectivePoint {
    fn encode(&self) -> Vec<u8> {
        point_to_bytes(self)
    }

    /// The identity is never a valid key or nonce share.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        bytes_to_point(bytes)?.ok_or(DecodeError::InvalidPoint)
    }
}

impl ExchangeValue for Uint256 {
    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| DecodeError::Length {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(bytes.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeRole {
    /// Commits first, reveals last.
    SendCommit,
    /// Waits for the commitment, then reveals immediately.
    SendValue,
}

impl ExchangeRole {
    /// Party 0 always commits first.
    pub fn for_party(party: PartyIndex) -> Self {
        if party == PartyIndex::ZERO {
            ExchangeRole::SendCommit
        } else {
            ExchangeRole::SendValue
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState<T> {
    Start,
    /// Commitment sent, waiting for the peer's value.
    WaitValue,
    /// Waiting for the peer's commitment.
    WaitCommitment,
    /// Own value revealed, waiting for the peer to open its commitment.
    WaitOpening(Commitment),
    Done(T),
}

/// What the exchange wants sent to the peer next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Commitment(Commitment),
    Value(Vec<u8>),
}

pub struct CommitRevealExchange<T: ExchangeValue> {
    role: ExchangeRole,
    own: T,
    /// Used in error reports.
    name: String,
    state: ExchangeState<T>,
}

impl<T: ExchangeValue> CommitRevealExchange<T> {
    pub fn new(role: ExchangeRole, own: T, name: impl ToString) -> Self {
        Self {
            role,
            own,
            name: name.to_string(),
            state: ExchangeState::Start,
        }
    }

    pub fn state(&self) -> &ExchangeState<T> {
        &self.state
    }

    pub fn peer_value(&self) -> Option<&T> {
        match &self.state {
            ExchangeState::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn start(&mut self) -> Result<Option<Outgoing>, ProtocolError> {
        self.expect(matches!(self.state, ExchangeState::Start))?;
        Ok(match self.role {
            ExchangeRole::SendCommit => {
                self.state = ExchangeState::WaitValue;
                Some(Outgoing::Commitment(self.own.commitment()))
            }
            ExchangeRole::SendValue => {
                self.state = ExchangeState::WaitCommitment;
                None
            }
        })
    }

    pub fn on_commitment(
        &mut self,
        commitment: Commitment,
    ) -> Result<Option<Outgoing>, ProtocolError> {
        self.expect(matches!(self.state, ExchangeState::WaitCommitment))?;
        self.state = ExchangeState::WaitOpening(commitment);
        Ok(Some(Outgoing::Value(self.own.encode())))
    }

    pub fn on_value(&mut self, bytes: &[u8]) -> Result<Option<Outgoing>, ProtocolError> {
        let value = T::decode(bytes).map_err(|reason| ProtocolError::Malformed {
            label: self.name.clone(),
            reason,
        })?;
        match &self.state {
            ExchangeState::WaitValue => {
                self.state = ExchangeState::Done(value);
                Ok(Some(Outgoing::Value(self.own.encode())))
            }
            ExchangeState::WaitOpening(commitment) => {
                let opened = value.commitment();
                if !bool::from(opened[..].ct_eq(&commitment[..])) {
                    return Err(ProtocolError::CommitmentMismatch {
                        label: self.name.clone(),
                    });
                }
                self.state = ExchangeState::Done(value);
                Ok(None)
            }
            _ => self.expect(false).map(|_| None),
        }
    }

    fn expect(&self, ok: bool) -> Result<(), ProtocolError> {
        if ok {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedMessage {
                label: self.name.clone(),
            })
        }
    }
}

/// The labels carrying the commitment and the value of one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeLabels {
    pub commitment: Label,
    pub value: Label,
}

/// Runs `exchange` to completion over `messenger` and returns the peer's value.
pub async fn drive_exchange<T: ExchangeValue>(
    exchange: &mut CommitRevealExchange<T>,
    messenger: &Messenger,
    labels: &ExchangeLabels,
) -> Result<T, ChannelError> {
    let first = exchange.start()?;
    send_outgoing(messenger, labels, first)?;
    loop {
        let outgoing = match exchange.state() {
            ExchangeState::Done(value) => return Ok(value.clone()),
            ExchangeState::WaitCommitment => {
                let payload = messenger.wait_for(&labels.commitment).await?;
                let commitment = parse_hash32(&payload)
                    .map_err(|err| ChannelError::malformed(&labels.commitment, err))?;
                exchange.on_commitment(commitment)?
            }
            ExchangeState::WaitValue | ExchangeState::WaitOpening(_) => {
                let payload = messenger.wait_for(&labels.value).await?;
                let bytes = hex::decode(&payload)
                    .map_err(|err| ChannelError::malformed(&labels.value, err.into()))?;
                exchange.on_value(&bytes)?
            }
            ExchangeState::Start => {
                return Err(ProtocolError::UnexpectedMessage {
                    label: labels.value.to_string(),
                }
                .into())
            }
        };
        send_outgoing(messenger, labels, outgoing)?;
    }
}

fn send_outgoing(
    messenger: &Messenger,
    labels: &ExchangeLabels,
    outgoing: Option<Outgoing>,
) -> Result<(), ChannelError> {
    match outgoing {
        Some(Outgoing::Commitment(commitment)) => {
            messenger.send(&labels.commitment, commitment.as_hex())
        }
        Some(Outgoing::Value(bytes)) => messenger.send(&labels.value, hex::encode(bytes)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{point_mul, random_scalar};
    use crate::network::testing::new_test_messengers;
    use crate::primitives::MessageKind;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn random_point() -> ProjectivePoint {
        point_mul(&random_scalar())
    }

    #[test]
    fn test_honest_exchange_state_transitions() {
        let (a, b) = (random_point(), random_point());
        let mut committer = CommitRevealExchange::new(ExchangeRole::SendCommit, a, "pks:test");
        let mut revealer = CommitRevealExchange::new(ExchangeRole::SendValue, b, "pks:test");

        let Some(Outgoing::Commitment(commitment)) = committer.start().unwrap() else {
            panic!("committer must open with a commitment");
        };
        assert_eq!(committer.state(), &ExchangeState::WaitValue);
        assert_eq!(revealer.start().unwrap(), None);
        assert_eq!(revealer.state(), &ExchangeState::WaitCommitment);

        let Some(Outgoing::Value(b_bytes)) = revealer.on_commitment(commitment).unwrap() else {
            panic!("revealer must answer with its value");
        };
        let Some(Outgoing::Value(a_bytes)) = committer.on_value(&b_bytes).unwrap() else {
            panic!("committer must reveal after receiving");
        };
        assert_eq!(revealer.on_value(&a_bytes).unwrap(), None);

        assert_eq!(committer.peer_value(), Some(&b));
        assert_eq!(revealer.peer_value(), Some(&a));
    }

    #[test]
    fn test_substituted_reveal_is_rejected() {
        let mut committer =
            CommitRevealExchange::new(ExchangeRole::SendCommit, random_point(), "pks:test");
        let mut revealer =
            CommitRevealExchange::new(ExchangeRole::SendValue, random_point(), "pks:test");
        let Some(Outgoing::Commitment(commitment)) = committer.start().unwrap() else {
            panic!("expected commitment");
        };
        revealer.start().unwrap();
        revealer.on_commitment(commitment).unwrap();

        let substitute = point_to_bytes(&random_point());
        assert_matches!(
            revealer.on_value(&substitute),
            Err(ProtocolError::CommitmentMismatch { label }) if label == "pks:test"
        );
        assert_eq!(revealer.peer_value(), None);
    }

    #[test]
    fn test_out_of_order_messages_rejected() {
        let mut revealer =
            CommitRevealExchange::new(ExchangeRole::SendValue, Uint256::from_u64(1), "u256:seed");
        revealer.start().unwrap();
        assert_matches!(
            revealer.on_value(&Uint256::from_u64(2)[..]),
            Err(ProtocolError::UnexpectedMessage { .. })
        );
        assert_matches!(
            revealer.on_value(&[1, 2, 3]),
            Err(ProtocolError::Malformed { .. })
        );
    }

    #[tokio::test]
    async fn test_exchange_over_messengers() {
        let (first, second) = new_test_messengers(Duration::from_secs(5));
        let labels = ExchangeLabels {
            commitment: Label::new(MessageKind::Uint256, "seedcmt"),
            value: Label::new(MessageKind::Uint256, "seed"),
        };
        let (a, b) = (Uint256::from_u64(1), Uint256::from_u64(2));
        let mut x = CommitRevealExchange::new(ExchangeRole::SendCommit, a, "seed");
        let mut y = CommitRevealExchange::new(ExchangeRole::SendValue, b, "seed");
        let (from_second, from_first) = futures::future::join(
            drive_exchange(&mut x, &first, &labels),
            drive_exchange(&mut y, &second, &labels),
        )
        .await;
        assert_eq!(from_second.unwrap(), b);
        assert_eq!(from_first.unwrap(), a);
    }
}
