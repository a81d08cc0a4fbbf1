//! # quarry-core
//! Chain types, consensus rules and collaborator traits for the Quarry PoW chain.

pub mod chain_state;
pub mod clock;
pub mod codec;
pub mod constants;
pub mod crypto;
pub mod difficulty;
pub mod error;
pub mod genesis;
pub mod mempool;
pub mod reward;
pub mod signal;
pub mod state;
pub mod traits;
pub mod types;
