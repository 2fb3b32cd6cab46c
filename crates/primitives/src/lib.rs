pub mod balance;
pub mod hash;
pub mod party;

pub use balance::ValuePair;
pub use hash::{Commitment, Hash32, NoteDigest, Uint256};
pub use party::PartyIndex;
