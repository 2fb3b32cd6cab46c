//! The `label-payload;` wire framing.
use super::constants::MAX_MESSAGE_LEN;
use crate::primitives::{is_label_byte, WireMessage};

pub fn encode_frame(message: &WireMessage) -> Vec<u8> {
    format!("{}-{};", message.label, message.payload).into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Label,
    Payload,
    /// The current frame is being dropped; resume after the next `;`.
    Skip,
}

/// Incremental decoder for the `label-payload;` framing. Bytes outside the
/// label and payload alphabets are ignored, so whitespace or line breaks
/// between frames are harmless. Frames with an empty label or longer than
/// [`MAX_MESSAGE_LEN`] are discarded.
pub struct FrameDecoder {
    section: Section,
    label: String,
    payload: String,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            section: Section::Label,
            label: String::new(),
            payload: String::new(),
        }
    }

    /// Feeds bytes into the decoder, returning every frame they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<WireMessage> {
        let mut frames = Vec::new();
        for &b in bytes {
            if let Some(frame) = self.push(b) {
                frames.push(frame);
            }
        }
        frames
    }

    fn push(&mut self, b: u8) -> Option<WireMessage> {
        if b == b';' {
            let section = std::mem::replace(&mut self.section, Section::Label);
            let label = std::mem::take(&mut self.label);
            let payload = std::mem::take(&mut self.payload);
            if section != Section::Payload || label.is_empty() {
                tracing::debug!(%label, "dropping malformed frame");
                return None;
            }
            return Some(WireMessage { label, payload });
        }
        match self.section {
            Section::Label if b == b'-' => self.section = Section::Payload,
            Section::Label if is_label_byte(b) => self.label.push(b as char),
            Section::Payload if b.is_ascii_hexdigit() => self.payload.push(b as char),
            _ => {}
        }
        if self.section != Section::Skip && self.label.len() + self.payload.len() > MAX_MESSAGE_LEN
        {
            tracing::warn!("dropping frame exceeding {} bytes", MAX_MESSAGE_LEN);
            self.section = Section::Skip;
            self.label.clear();
            self.payload.clear();
        }
        None
    }
}
