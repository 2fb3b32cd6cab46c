pub mod channel;
pub mod cli;
pub mod coin;
pub mod commit_reveal;
pub mod config;
pub mod curve;
pub mod derivation;
pub mod dkg;
pub mod errors;
pub mod ledger;
mod metrics;
pub mod network;
pub mod p2p;
pub mod primitives;
pub mod schnorr;
pub mod sign;
pub mod tracing;
mod tracking;

#[cfg(test)]
mod tests;
