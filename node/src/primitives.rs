use crate::errors::DecodeError;
use std::fmt;
use std::str::FromStr;
use zchannel_primitives::hash::{Hash32, ParseHashError};

/// The kind of a channel message. The string prefix exists only on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A party's own public key (`fund`, `close`, `redeem`, `revoke`).
    PublicKey,
    /// Revealed public key share during key generation.
    PublicKeyShare,
    /// Revealed signing nonce during distributed signing.
    AuxPublicKey,
    /// Commitment to a public key share.
    Commitment,
    /// Commitment to a signing nonce.
    AuxCommitment,
    /// Signature share.
    SignatureShare,
    /// Complete individual signature.
    Signature,
    /// Raw 256-bit value.
    Uint256,
    /// Proposed balance pair for an update.
    Balance,
    /// Ledger confirmation.
    Confirmation,
}

impl MessageKind {
    const ALL: [MessageKind; 10] = [
        MessageKind::PublicKey,
        MessageKind::PublicKeyShare,
        MessageKind::AuxPublicKey,
        MessageKind::Commitment,
        MessageKind::AuxCommitment,
        MessageKind::SignatureShare,
        MessageKind::Signature,
        MessageKind::Uint256,
        MessageKind::Balance,
        MessageKind::Confirmation,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            MessageKind::PublicKey => "pk",
            MessageKind::PublicKeyShare => "pks",
            MessageKind::AuxPublicKey => "pka",
            MessageKind::Commitment => "cm",
            MessageKind::AuxCommitment => "cma",
            MessageKind::SignatureShare => "ssig",
            MessageKind::Signature => "sig",
            MessageKind::Uint256 => "u256",
            MessageKind::Balance => "bal",
            MessageKind::Confirmation => "conf",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }
}

/// A message label: a kind plus a tag that makes it unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub kind: MessageKind,
    pub tag: String,
}

impl Label {
    pub fn new(kind: MessageKind, tag: impl ToString) -> Self {
        Self {
            kind,
            tag: tag.to_string(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.tag)
    }
}

impl FromStr for Label {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecodeError::InvalidLabel(s.to_string());
        if !is_valid_label(s) {
            return Err(invalid());
        }
        let (prefix, tag) = s.split_once(':').ok_or_else(invalid)?;
        let kind = MessageKind::from_prefix(prefix).ok_or_else(invalid)?;
        if tag.is_empty() {
            return Err(invalid());
        }
        Ok(Label::new(kind, tag))
    }
}

/// Reserved label telling the peer that this side has shut its session down.
pub const OVER_LABEL: &str = "over";

/// A message as it travels between the two parties: a label in
/// `[0-9A-Za-z:]+` and a hex payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub label: String,
    pub payload: String,
}

impl WireMessage {
    pub fn new(label: impl ToString, payload: impl Into<String>) -> Result<Self, DecodeError> {
        let label = label.to_string();
        let payload = payload.into();
        if !is_valid_label(&label) {
            return Err(DecodeError::InvalidLabel(label));
        }
        if !payload.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DecodeError::InvalidPayload(payload));
        }
        Ok(Self { label, payload })
    }

    pub fn over() -> Self {
        Self {
            label: OVER_LABEL.to_string(),
            payload: String::new(),
        }
    }

    pub fn is_over(&self) -> bool {
        self.label == OVER_LABEL
    }
}

pub fn is_label_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b':'
}

pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && label.bytes().all(is_label_byte)
}

/// Parses a 64-character hex payload into a tagged 256-bit value.
pub fn parse_hash32<T>(payload: &str) -> Result<Hash32<T>, DecodeError> {
    payload.parse().map_err(|err| match err {
        ParseHashError::Hex(err) => DecodeError::Hex(err),
        ParseHashError::Length(actual) => DecodeError::Length {
            expected: 32,
            actual,
        },
    })
}
