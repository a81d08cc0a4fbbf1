//! Cross-crate test suite for Quarry.
//!
//! Integration tests drive the miner, engine and chain together; adversarial
//! tests feed malformed headers, uncles and transactions through the same
//! paths a peer or a pool submitter could reach.

pub mod helpers;
