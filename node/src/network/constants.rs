/// Maximum length of a single frame, label and payload included. Frames
/// exceeding this are dropped by the decoder so that a misbehaving peer cannot
/// grow the receive buffer without bound.
pub const MAX_MESSAGE_LEN: usize = 4096;
