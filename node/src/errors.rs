use crate::channel::ChannelState;
use thiserror::Error;

/// A value received or loaded from its encoded form could not be decoded.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum DecodeError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("bytes do not encode a point on the curve")]
    InvalidPoint,

    #[error("bytes do not encode a canonical scalar")]
    InvalidScalar,

    #[error("malformed label {0:?}")]
    InvalidLabel(String),

    #[error("payload is not hex: {0:?}")]
    InvalidPayload(String),
}

/// The peer deviated from the protocol, or the data it sent does not check out.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum ProtocolError {
    #[error("revealed value for {label} does not match its commitment")]
    CommitmentMismatch { label: String },

    #[error("signature verification failed for {context}")]
    InvalidSignature { context: String },

    #[error("signature shares were computed over different challenges")]
    ChallengeMismatch,

    #[error("peer opened with balances {peer}, we opened with {local}")]
    InitialBalanceMismatch { local: String, peer: String },

    #[error("balance update {proposed} does not conserve total of {previous}")]
    BalanceNotConserved { previous: String, proposed: String },

    #[error("malformed payload for {label}: {reason}")]
    Malformed { label: String, reason: DecodeError },

    #[error("message {label} arrived out of turn")]
    UnexpectedMessage { label: String },
}

/// A key pair lacks the half an operation needs.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum KeyError {
    #[error("key pair has no secret")]
    MissingSecret,

    #[error("key pair has no public key")]
    MissingPublic,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DerivationError {
    #[error("derivation index {0} out of range, must be below 4")]
    IndexOutOfRange(u8),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),

    #[error("timed out waiting for {label}")]
    Timeout { label: String },

    #[error("session cancelled by peer")]
    Cancelled,

    #[error("cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ChannelState,
    },

    #[error("history gap: expected {expected} entries, found {actual}")]
    HistoryGap { expected: usize, actual: usize },

    #[error("invalid balance: {0}")]
    InvalidBalance(String),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

impl ChannelError {
    pub fn malformed(label: impl ToString, reason: DecodeError) -> Self {
        ProtocolError::Malformed {
            label: label.to_string(),
            reason,
        }
        .into()
    }
}
